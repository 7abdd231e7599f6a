// Licensed under the Apache-2.0 license

//! Cross-cutting helpers shared by the driver modules.

/// Minimal logging seam used by the drivers.
///
/// Drivers never format strings themselves; they hand static messages to the
/// logger so that a `no_std` build without a console can pick [`NoOpLogger`]
/// and pay nothing for it.
pub trait Logger {
    fn debug(&mut self, msg: &str);
    fn error(&mut self, msg: &str);
}

/// Logger that drops every message.
#[derive(Copy, Clone, Debug, Default)]
pub struct NoOpLogger;

impl Logger for NoOpLogger {
    fn debug(&mut self, _msg: &str) {}
    fn error(&mut self, _msg: &str) {}
}

impl<L: Logger + ?Sized> Logger for &mut L {
    fn debug(&mut self, msg: &str) {
        (**self).debug(msg);
    }

    fn error(&mut self, msg: &str) {
        (**self).error(msg);
    }
}
