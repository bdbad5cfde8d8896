//! Scan output.
//!
//! Two channels: human-readable difference lines on stdout (gated by
//! `output`), and a machine-readable event stream for frontends, one
//! `scan:<op>:<disk>:<sub>` record per change. Diagnostics go through
//! `tracing`, not through here.

use std::io::Write;
use std::path::Path;

pub struct Reporter {
    pub output: bool,
    pub verbose: bool,
    gui: Option<Box<dyn Write>>,
}

impl Reporter {
    pub fn new(output: bool, verbose: bool) -> Self {
        Reporter {
            output,
            verbose,
            gui: None,
        }
    }

    pub fn with_gui(mut self, stream: Box<dyn Write>) -> Self {
        self.gui = Some(stream);
        self
    }

    fn gui_line(&mut self, args: std::fmt::Arguments<'_>) {
        if let Some(w) = self.gui.as_mut() {
            // frontends poll the stream, so flush per record
            let _ = writeln!(w, "{args}");
            let _ = w.flush();
        }
    }

    pub fn equal(&mut self, disk: &str, sub: &Path) {
        self.gui_line(format_args!("scan:equal:{disk}:{}", sub.display()));
    }

    pub fn add(&mut self, disk: &str, dir: &Path, sub: &Path) {
        self.gui_line(format_args!("scan:add:{disk}:{}", sub.display()));
        if self.output {
            println!("Add '{}'", dir.join(sub).display());
        }
    }

    pub fn update(&mut self, disk: &str, dir: &Path, sub: &Path) {
        self.gui_line(format_args!("scan:update:{disk}:{}", sub.display()));
        if self.output {
            println!("Update '{}'", dir.join(sub).display());
        }
    }

    pub fn moved(&mut self, disk: &str, dir: &Path, old_sub: &Path, new_sub: &Path) {
        self.gui_line(format_args!(
            "scan:move:{disk}:{}:{}",
            old_sub.display(),
            new_sub.display()
        ));
        if self.output {
            println!(
                "Move '{}' '{}'",
                dir.join(old_sub).display(),
                dir.join(new_sub).display()
            );
        }
    }

    pub fn remove(&mut self, disk: &str, dir: &Path, sub: &Path) {
        self.gui_line(format_args!("scan:remove:{disk}:{}", sub.display()));
        if self.output {
            println!("Remove '{}'", dir.join(sub).display());
        }
    }

    pub fn excluded(&mut self, what: &str, path: &Path) {
        if self.verbose {
            println!("Excluding {what} '{}'", path.display());
        }
    }

    pub fn scanning(&mut self, disk: &str) {
        println!("Scanning disk {disk}...");
    }

    pub fn totals(&mut self, t: &crate::scan::ScanCounts) {
        if self.verbose {
            println!("\tequal {}", t.equal);
            println!("\tmoved {}", t.moved);
            println!("\tchanged {}", t.changed);
            println!("\tremoved {}", t.removed);
            println!("\tadded {}", t.added);
        }
        if self.output && t.moved == 0 && t.changed == 0 && t.removed == 0 && t.added == 0 {
            println!("No difference.");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn gui_events_are_one_record_per_line() {
        let buf = SharedBuf::default();
        let mut r = Reporter::new(false, false).with_gui(Box::new(buf.clone()));
        r.equal("d1", Path::new("a/b"));
        r.moved("d1", Path::new("/mnt/d1"), Path::new("old"), Path::new("new"));
        r.remove("d1", Path::new("/mnt/d1"), Path::new("gone"));

        let out = String::from_utf8(buf.0.lock().unwrap().clone()).unwrap();
        assert_eq!(
            out,
            "scan:equal:d1:a/b\nscan:move:d1:old:new\nscan:remove:d1:gone\n"
        );
    }

    #[test]
    fn no_gui_stream_is_silent() {
        let mut r = Reporter::new(false, false);
        r.equal("d1", Path::new("a"));
        r.add("d1", Path::new("/mnt/d1"), Path::new("a"));
    }
}
