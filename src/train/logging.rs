use std::fmt;

/// Receiver of formatted progress messages
pub type MessageCallback = Box<dyn FnMut(&str) + Send>;

/// Progress sink handed to the trainers.
///
/// Every message goes to the `log` facade at info level, and to the
/// user callback when one is installed.
#[derive(Default)]
pub struct Logging {
    callback: Option<MessageCallback>,
}

impl fmt::Debug for Logging {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logging")
            .field("callback", &self.callback.is_some())
            .finish()
    }
}

impl Logging {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_callback(&mut self, callback: Option<MessageCallback>) {
        self.callback = callback;
    }

    pub fn log(&mut self, args: fmt::Arguments<'_>) {
        let message = args.to_string();
        log::info!("{}", message);
        if let Some(callback) = self.callback.as_mut() {
            callback(&message);
        }
    }
}

macro_rules! logging {
    ($lg:expr, $($arg:tt)*) => {
        $lg.log(format_args!($($arg)*))
    };
}
