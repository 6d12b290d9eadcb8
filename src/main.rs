use podtunnel::status::ExitStatus;
use podtunnel::{core, signals};
use std::sync::atomic::{AtomicBool, Ordering};

/// Entry point - catches Ctrl+C and calls core::run()
///
/// Returns ExitStatus directly, which implements std::process::Termination.
fn main() -> ExitStatus {
    // Set up Ctrl+C handler that sets a flag instead of calling exit()
    // This lets an active port forward stop and release its listener
    ctrlc::set_handler(move || {
        signals::set_interrupted();

        // Print newline to clean up interrupted line
        eprintln!("\nInterrupted");

        // On second Ctrl+C, force exit (user really wants out)
        static SECOND_CTRL_C: AtomicBool = AtomicBool::new(false);
        if SECOND_CTRL_C.swap(true, Ordering::SeqCst) {
            std::process::exit(ExitStatus::Interrupted as i32);
        }
    })
    .ok();

    let args: Vec<String> = std::env::args().collect();
    core::run(args)
}
