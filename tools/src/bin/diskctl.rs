//! Runs single file system operations against a disk image.

use clap::{value_t, App, AppSettings, Arg, ArgMatches, SubCommand};
use diskfs::io::{BlockStorage, FileBlockEmulator};
use diskfs::DiskFs;
use std::fs::File;
use std::io::{self, Read, Write};
use tools::{exit_with, logger};

fn path_arg() -> Arg<'static, 'static> {
    Arg::with_name("path").required(true).index(1)
}

pub fn main() {
    let matches = App::new("diskctl")
        .about("Inspects and edits a disk image")
        .setting(AppSettings::SubcommandRequiredElseHelp)
        .arg(
            Arg::with_name("disk")
                .short("d")
                .long("disk")
                .takes_value(true)
                .default_value(".disk")
                .help("Disk image to operate on"),
        )
        .arg(
            Arg::with_name("verbose")
                .short("v")
                .multiple(true)
                .global(true)
                .help("Raises log verbosity, repeat for more"),
        )
        .subcommand(
            SubCommand::with_name("ls")
                .about("Lists the root or a directory")
                .arg(Arg::with_name("path").default_value("/").index(1)),
        )
        .subcommand(
            SubCommand::with_name("stat")
                .about("Shows whether a path is a directory and its size")
                .arg(path_arg()),
        )
        .subcommand(SubCommand::with_name("mkdir").about("Creates a directory").arg(path_arg()))
        .subcommand(SubCommand::with_name("rmdir").about("Removes a directory (no-op)").arg(path_arg()))
        .subcommand(SubCommand::with_name("touch").about("Creates an empty file").arg(path_arg()))
        .subcommand(SubCommand::with_name("rm").about("Deletes a file").arg(path_arg()))
        .subcommand(
            SubCommand::with_name("cat")
                .about("Prints a file")
                .arg(path_arg())
                .arg(offset_arg()),
        )
        .subcommand(
            SubCommand::with_name("write")
                .about("Writes stdin, or a host file, into a file")
                .arg(path_arg())
                .arg(offset_arg())
                .arg(
                    Arg::with_name("input")
                        .short("i")
                        .long("input")
                        .takes_value(true)
                        .help("Host file to copy instead of stdin"),
                ),
        )
        .subcommand(
            SubCommand::with_name("truncate")
                .about("Shrinks a file")
                .arg(path_arg())
                .arg(Arg::with_name("size").required(true).index(2)),
        )
        .subcommand(
            SubCommand::with_name("fsck")
                .about("Compares the bitmap with the blocks in use")
                .arg(
                    Arg::with_name("reclaim")
                        .long("reclaim")
                        .help("Frees blocks that nothing references"),
                ),
        )
        .get_matches();

    logger::init(matches.occurrences_of("verbose"));

    let disk = matches.value_of("disk").unwrap_or(".disk");
    let dev = FileBlockEmulator::open_disk(disk).unwrap_or_else(|e| exit_with(disk, e));
    let mut fs = DiskFs::open(dev).unwrap_or_else(|e| exit_with(disk, e));

    if let Err(e) = run(&mut fs, &matches) {
        exit_with("diskctl", e);
    }
    fs.sync().unwrap_or_else(|e| exit_with(disk, e));
}

fn offset_arg() -> Arg<'static, 'static> {
    Arg::with_name("offset")
        .short("o")
        .long("offset")
        .takes_value(true)
        .default_value("0")
        .help("Byte offset into the file")
}

fn run<T: BlockStorage>(fs: &mut DiskFs<T>, matches: &ArgMatches) -> diskfs::Result<()> {
    match matches.subcommand() {
        ("ls", Some(sub)) => {
            for name in fs.list_directory(sub.value_of("path").unwrap_or("/"))? {
                println!("{}", name);
            }
        }
        ("stat", Some(sub)) => {
            let attrs = fs.get_attributes(path(sub))?;
            let kind = if attrs.is_directory { "directory" } else { "file" };
            println!("{} {} bytes", kind, attrs.size);
        }
        ("mkdir", Some(sub)) => fs.create_directory(path(sub))?,
        ("rmdir", Some(sub)) => fs.remove_directory(path(sub))?,
        ("touch", Some(sub)) => fs.create_file(path(sub))?,
        ("rm", Some(sub)) => fs.remove_file(path(sub))?,
        ("cat", Some(sub)) => {
            let offset = value_t!(sub, "offset", u64).unwrap_or_else(|e| e.exit());
            let size = fs.get_attributes(path(sub))?.size;
            let contents = fs.read_file(path(sub), size.saturating_sub(offset) as usize, offset)?;
            io::stdout().write_all(&contents)?;
        }
        ("write", Some(sub)) => {
            let offset = value_t!(sub, "offset", u64).unwrap_or_else(|e| e.exit());
            let mut buf = Vec::new();
            match sub.value_of("input") {
                Some(input) => File::open(input)?.read_to_end(&mut buf)?,
                None => io::stdin().read_to_end(&mut buf)?,
            };
            let written = fs.write_file(path(sub), &buf, offset)?;
            println!("wrote {} bytes", written);
        }
        ("truncate", Some(sub)) => {
            let size = value_t!(sub, "size", u64).unwrap_or_else(|e| e.exit());
            fs.truncate_file(path(sub), size)?;
        }
        ("fsck", Some(sub)) => {
            let report = fs.check()?;
            println!(
                "{} leaked, {} dangling, {} shared",
                report.leaked.len(),
                report.dangling.len(),
                report.shared.len()
            );
            if sub.is_present("reclaim") && !report.leaked.is_empty() {
                println!("reclaimed {} blocks", fs.reclaim_leaked()?);
            }
            println!("{} blocks free", fs.free_blocks());
        }
        _ => unreachable!("clap requires a known subcommand"),
    }
    Ok(())
}

fn path<'a>(sub: &'a ArgMatches) -> &'a str {
    sub.value_of("path").unwrap_or("/")
}
