use anyhow::{anyhow, bail};
use drift::{state_scan, Disk, Filters, Reporter, ScanOptions, State};

// no clap: the argument surface is tiny and this runs from scripts where
// startup time matters
fn usage() -> ! {
    eprintln!(
        "usage: drift scan [options] <name>=<dir>...\n\
         \n\
         options:\n\
         \t--by-name      identify files by path instead of inode\n\
         \t--force-zero   accept files that regressed to zero size\n\
         \t--force-empty  accept disks that lost every recorded file\n\
         \t--hidden       exclude dot-files\n\
         \t--gui          emit machine-readable events on stderr\n\
         \t--quiet        suppress per-file difference lines\n\
         \t--verbose      print exclusion reasons and totals"
    );
    std::process::exit(2);
}

pub fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .init();

    let args = std::env::args().collect::<Vec<_>>();
    let Some(subcommand) = args.get(1) else { usage() };

    match subcommand.as_str() {
        "scan" => {
            let mut opts = ScanOptions::default();
            let mut filters = Filters::new();
            let mut output = true;
            let mut verbose = false;
            let mut gui = false;
            let mut disks = Vec::new();

            for arg in &args[2..] {
                match arg.as_str() {
                    "--by-name" => opts.find_by_name = true,
                    "--force-zero" => opts.force_zero = true,
                    "--force-empty" => opts.force_empty = true,
                    "--hidden" => filters.filter_hidden = true,
                    "--gui" => gui = true,
                    "--quiet" => output = false,
                    "--verbose" => verbose = true,
                    spec if !spec.starts_with('-') => {
                        let (name, dir) = spec
                            .split_once('=')
                            .ok_or_else(|| anyhow!("bad disk spec '{spec}', want name=dir"))?;
                        disks.push(Disk::new(name, dir));
                    }
                    other => bail!("unknown option: {other}"),
                }
            }
            if disks.is_empty() {
                usage();
            }

            // without a content file every disk starts from an empty
            // catalog, so this reports what a first sync would record;
            // loading and saving the catalog belongs to the caller that
            // owns the content file
            let mut state = State::new(opts, filters);
            for disk in disks {
                state.add_disk(disk);
            }

            let mut report = Reporter::new(output, verbose);
            if gui {
                report = report.with_gui(Box::new(std::io::stderr()));
            }

            let totals = state_scan(&mut state, &mut report)?;
            if verbose {
                eprintln!(
                    "scanned {} entries, {} changes",
                    totals.equal + totals.added + totals.changed + totals.moved,
                    totals.added + totals.changed + totals.removed + totals.moved
                );
            }
            Ok(())
        }

        _ => Err(anyhow!("unknown subcommand: {subcommand}")),
    }
}
