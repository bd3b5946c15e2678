pub mod event_loop;
pub mod signals;

pub use event_loop::run;
pub use signals::spawn_signal_handler;
