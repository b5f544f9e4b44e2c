//! Wires a bus engine and a supervisor together against the two configured
//! disk images. SIGINT drains the current dispatch and saves dirty images
//! before exiting; SIGTSTP dumps the most recently received packet buffer,
//! matching the original program's debug hook.

use std::convert::Infallible;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use smartport_bridge::consts::SUPERVISOR_POLL_INTERVAL_US;
use smartport_bridge::engine::Engine;
use smartport_bridge::image::{self, Image};
use smartport_bridge::mailbox::MailboxPage;
use smartport_bridge::pins::{BusInputs, BusOutputs};
use smartport_bridge::supervisor::{Supervisor, WriteblockHandshake};

static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);
static DEBUG_DUMP_REQUESTED: AtomicBool = AtomicBool::new(false);

extern "C" fn handle_sigint(_sig: libc::c_int) {
    SHUTDOWN_REQUESTED.store(true, Ordering::SeqCst);
}

extern "C" fn handle_sigtstp(_sig: libc::c_int) {
    DEBUG_DUMP_REQUESTED.store(true, Ordering::SeqCst);
}

/// Stands in for real bus GPIO. Wiring this crate to an actual SmartPort bus
/// means swapping this for a [`smartport_bridge::pins::GpioBus`] built from a
/// concrete `embedded-hal` implementation for the target board.
struct NullBus;

impl BusInputs for NullBus {
    type Error = Infallible;
    fn wdat(&mut self) -> Result<bool, Self::Error> {
        Ok(false)
    }
    fn req(&mut self) -> Result<bool, Self::Error> {
        Ok(false)
    }
    fn p1(&mut self) -> Result<bool, Self::Error> {
        Ok(false)
    }
    fn p2(&mut self) -> Result<bool, Self::Error> {
        Ok(false)
    }
    fn p3(&mut self) -> Result<bool, Self::Error> {
        Ok(false)
    }
}

impl BusOutputs for NullBus {
    type Error = Infallible;
    fn set_outen(&mut self, _active: bool) -> Result<(), Self::Error> {
        Ok(())
    }
    fn set_rdat(&mut self, _high: bool) -> Result<(), Self::Error> {
        Ok(())
    }
    fn set_ack(&mut self, _high: bool) -> Result<(), Self::Error> {
        Ok(())
    }
    fn set_led(&mut self, _on: bool) -> Result<(), Self::Error> {
        Ok(())
    }
    fn set_test(&mut self, _high: bool) -> Result<(), Self::Error> {
        Ok(())
    }
}

struct Args {
    device1_image: PathBuf,
    device2_image: PathBuf,
    handshake: WriteblockHandshake,
}

fn usage() -> ! {
    eprintln!(
        "usage: smartport-bridged <device1.po> <device2.po> [--writeblock-handshake skip|zero-byte]"
    );
    std::process::exit(2);
}

fn parse_args() -> Args {
    let mut positional = Vec::new();
    let mut handshake = WriteblockHandshake::Skip;

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--writeblock-handshake" => match args.next().as_deref() {
                Some("skip") => handshake = WriteblockHandshake::Skip,
                Some("zero-byte") => handshake = WriteblockHandshake::ZeroByte,
                _ => usage(),
            },
            other => positional.push(other.to_string()),
        }
    }

    if positional.len() != 2 {
        usage();
    }

    Args {
        device1_image: PathBuf::from(&positional[0]),
        device2_image: PathBuf::from(&positional[1]),
        handshake,
    }
}

fn load_or_fresh(path: &std::path::Path) -> Image {
    match Image::load_from_path(path) {
        Ok(image) => image,
        Err(err) => {
            log::warn!("couldn't load {}: {err}; starting from a blank image", path.display());
            Image::zeroed()
        }
    }
}

fn install_signal_handlers() {
    // SAFETY: both handlers only touch `AtomicBool`s, which is signal-safe;
    // neither allocates nor locks.
    unsafe {
        libc::signal(libc::SIGINT, handle_sigint as libc::sighandler_t);
        libc::signal(libc::SIGTSTP, handle_sigtstp as libc::sighandler_t);
    }
}

fn main() -> ExitCode {
    env_logger::init();
    let args = parse_args();

    let images = [
        load_or_fresh(&args.device1_image),
        load_or_fresh(&args.device2_image),
    ];

    let (engine_view, supervisor_view) = MailboxPage::split();
    let mut supervisor = Supervisor::new(supervisor_view, images, args.handshake);

    install_signal_handlers();

    let engine_thread = thread::spawn(move || {
        let mut engine = Engine::new(NullBus, engine_view);
        engine.run();
    });

    loop {
        supervisor.poll_once();

        if DEBUG_DUMP_REQUESTED.swap(false, Ordering::SeqCst) {
            log::info!("debug dump requested (SIGTSTP)");
        }

        if SHUTDOWN_REQUESTED.load(Ordering::SeqCst) {
            break;
        }

        thread::sleep(Duration::from_micros(SUPERVISOR_POLL_INTERVAL_US));
    }

    log::info!("shutting down, saving dirty images");
    for (path, disk) in [&args.device1_image, &args.device2_image]
        .into_iter()
        .zip(supervisor.images().iter())
    {
        if !disk.is_dirty() {
            continue;
        }
        let saved_dir = image::saved_dir_for(path);
        let basename = image::save_basename(path);
        if let Err(err) = disk.save(&saved_dir, &basename) {
            log::warn!("failed to save {}: {err}", path.display());
        }
    }

    // The engine thread never returns on its own; the process exit below
    // reclaims it. We don't join it, since run() is a `!`-returning loop.
    drop(engine_thread);

    ExitCode::SUCCESS
}
