//! # semled Firmware
//!
//! Boots the board, installs the serial logger, performs the surplus
//! release on the token and runs the three tasks forever.
//!
//! Built for a hosted target, the same boot sequence runs on a simulated
//! clock for ten seconds and prints the log to stdout.

#![cfg_attr(all(target_arch = "arm", target_os = "none"), no_std)]
#![cfg_attr(all(target_arch = "arm", target_os = "none"), no_main)]

#[cfg(all(target_arch = "arm", target_os = "none"))]
mod firmware {
    use cortex_m_rt::entry;
    use log::LevelFilter;
    use panic_halt as _;

    use semled::app::{DriveTask, StatusTask};
    use semled::arch::{cortex_m4, stm32f4};
    use semled::config::TOKEN_SEMANTICS;
    use semled::kernel;
    use semled::scheduler::Scheduler;
    use semled::serial::{self, SerialChannel, SerialLogger};
    use semled::sync::Semaphore;

    static TOKEN: Semaphore = Semaphore::for_semantics(TOKEN_SEMANTICS);
    static LOGGER: SerialLogger<stm32f4::Usart2> = SerialLogger::new(LevelFilter::Trace);

    /// Firmware entry point. Does not return.
    #[entry]
    fn main() -> ! {
        let mut cp = cortex_m::Peripherals::take().unwrap();

        let (led, uart) = stm32f4::init();
        LOGGER.attach(SerialChannel::new(uart));
        // Only fails if a logger is already installed.
        let _ = serial::init(&LOGGER, serial::level_from_env(option_env!("LOG")));

        cortex_m4::set_interrupt_priorities();
        cortex_m4::configure_systick(&mut cp.SYST);

        let _ = kernel::surplus_release(&TOKEN);

        let mut drive_high = DriveTask::drive_high(&TOKEN, &led);
        let mut drive_low = DriveTask::drive_low(&TOKEN, &led);
        let mut status = StatusTask::new();

        let mut sched = Scheduler::new();
        kernel::spawn_tasks(&mut sched, &mut drive_high, &mut drive_low, &mut status)
            .expect("Failed to spawn tasks");

        kernel::run(&mut sched, || {
            let received = LOGGER.with_channel(|channel| channel.poll_rx()).unwrap_or(0);
            let sent = LOGGER.pump();
            received + sent > 0
        })
    }
}

#[cfg(not(all(target_arch = "arm", target_os = "none")))]
fn main() {
    use std::cell::Cell;
    use std::io::Write;

    use log::{info, LevelFilter, Log};

    use semled::app::{DriveTask, StatusTask};
    use semled::config::TOKEN_SEMANTICS;
    use semled::kernel;
    use semled::line::{Level, OutputLine};
    use semled::scheduler::Scheduler;
    use semled::serial::{self, SerialChannel, SerialLogger, SerialPort};
    use semled::sync::Semaphore;

    const SIMULATED_TICKS: u64 = 10_000;

    /// Stdout standing in for the UART; nothing is ever received.
    struct StdoutPort;

    impl SerialPort for StdoutPort {
        fn write_byte(&mut self, byte: u8) {
            // Drop the CR of each CRLF; the terminal wants plain newlines.
            if byte != b'\r' {
                let _ = std::io::stdout().write_all(&[byte]);
            }
        }

        fn read_byte(&mut self) -> Option<u8> {
            None
        }

        fn flush(&mut self) {
            let _ = std::io::stdout().flush();
        }
    }

    /// Output line that logs every change of level.
    struct ConsoleLine {
        level: Cell<Option<Level>>,
    }

    impl OutputLine for ConsoleLine {
        fn set_level(&self, level: Level) {
            if self.level.replace(Some(level)) != Some(level) {
                info!(target: "line", "{:?}", level);
            }
        }
    }

    static LOGGER: SerialLogger<StdoutPort> = SerialLogger::new(LevelFilter::Trace);

    LOGGER.attach(SerialChannel::new(StdoutPort));
    let _ = serial::init(&LOGGER, serial::level_from_env(option_env!("LOG")));

    let token = Semaphore::for_semantics(TOKEN_SEMANTICS);
    let _ = kernel::surplus_release(&token);

    let line = ConsoleLine {
        level: Cell::new(None),
    };
    let mut drive_high = DriveTask::drive_high(&token, &line);
    let mut drive_low = DriveTask::drive_low(&token, &line);
    let mut status = StatusTask::new();

    let mut sched = Scheduler::new();
    if let Err(err) = kernel::spawn_tasks(&mut sched, &mut drive_high, &mut drive_low, &mut status)
    {
        eprintln!("failed to spawn tasks: {}", err);
        std::process::exit(1);
    }

    loop {
        sched.run_ready();
        LOGGER.pump();
        if sched.now() >= SIMULATED_TICKS {
            break;
        }
        sched.tick();
    }
    sched.shutdown();

    info!(
        "{} ticks, {} dispatches, peak holders {}",
        sched.now(),
        sched.context_switches(),
        token.peak_outstanding()
    );
    for task in [&drive_high, &drive_low] {
        let stats = task.stats();
        info!(
            "{}: {} acquisitions, {} timeouts",
            task.name(),
            stats.acquisitions,
            stats.timeouts
        );
    }
    info!("status: {} reports", status.reports());
    log::logger().flush();
}
