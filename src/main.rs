//! # Command Line Interface
//!
//! The launcher loads the disk image, wraps it in a volume, and hands the
//! volume to the kernel bridge.  When the bridge returns (unmount) the
//! volume is flushed and the image file is rewritten, but only if something
//! was actually modified.  A crash mid-session therefore discards all
//! changes; backups are the user's responsibility.
//!
//! Set the RUST_LOG environment variable to control logging level.
//!   levels: trace,debug,info,warn,error

use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, RwLock};
use clap::{Arg, ArgAction, Command};
use fuser::MountOption;
use env_logger;
use hcfuse::fs::cpm::CpmFs;
use hcfuse::fs::cpm::types::Variant;
use hcfuse::fuse::FuseAdaptor;

const RCH: &str = "unreachable was reached";

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let matches = Command::new("hcfuse")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Mount ZX Spectrum / Amstrad CPC / CP/M floppy disk images as a directory")
        .arg(Arg::new("mountpoint")
            .required_unless_present_any(["catalog", "dump-directory"])
            .help("where to mount the image"))
        .arg(Arg::new("file")
            .long("file")
            .required(true)
            .value_name("PATH")
            .help("the path to the disk image to load"))
        .arg(Arg::new("filesystem")
            .long("filesystem")
            .value_name("FS")
            .default_value("hc")
            .help("the filesystem type (hc or cpm)"))
        .arg(Arg::new("options")
            .short('o')
            .value_name("OPTIONS")
            .action(ArgAction::Append)
            .help("comma separated mount options passed to the filesystem bridge"))
        .arg(Arg::new("catalog")
            .long("catalog")
            .action(ArgAction::SetTrue)
            .help("print the image directory and exit without mounting"))
        .arg(Arg::new("dump-directory")
            .long("dump-directory")
            .action(ArgAction::SetTrue)
            .help("hexdump the raw directory blocks and exit without mounting"))
        .get_matches();

    let image_path = matches.get_one::<String>("file").expect(RCH).clone();
    let variant = Variant::from_str(matches.get_one::<String>("filesystem").expect(RCH))?;

    let img = hcfuse::create_img_from_file(&image_path)?;
    let volume = CpmFs::new(img, variant)?;

    if matches.get_flag("catalog") {
        print!("{}", volume.catalog());
        return Ok(());
    }
    if matches.get_flag("dump-directory") {
        print!("{}", volume.dump_directory()?);
        return Ok(());
    }
    let mountpoint = matches.get_one::<String>("mountpoint").expect(RCH).clone();

    let mut options = vec![MountOption::FSName("hcfuse".to_string())];
    if let Some(values) = matches.get_many::<String>("options") {
        for value in values {
            for opt in value.split(',') {
                options.push(match opt {
                    "allow_other" => MountOption::AllowOther,
                    "allow_root" => MountOption::AllowRoot,
                    "auto_unmount" => MountOption::AutoUnmount,
                    "ro" => MountOption::RO,
                    "rw" => MountOption::RW,
                    other => MountOption::CUSTOM(other.to_string()),
                });
            }
        }
    }

    let volume = Arc::new(RwLock::new(volume));
    fuser::mount2(FuseAdaptor::new(volume.clone()), &mountpoint, &options)?;

    // unmounted; make the session's changes permanent
    let mut volume = match volume.write() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    volume.flush()?;
    if volume.modified() {
        volume.save(Path::new(&image_path))?;
    }
    Ok(())
}
