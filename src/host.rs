use std::fmt;

/// User-visible events raised by the settings core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    LoggedIn,
    LoggedOut,
    AccountDeleted,
    SubscriptionsImported(usize),
    SubscriptionsExported(usize),
    Error(String),
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notice::LoggedIn => write!(f, "Logged in"),
            Notice::LoggedOut => write!(f, "Logged out"),
            Notice::AccountDeleted => write!(f, "Account deleted"),
            Notice::SubscriptionsImported(count) => {
                write!(f, "Imported {count} subscriptions")
            }
            Notice::SubscriptionsExported(count) => {
                write!(f, "Exported {count} subscriptions")
            }
            Notice::Error(message) => write!(f, "Error: {message}"),
        }
    }
}

/// The embedding application. It owns rendering; the core only asks it to
/// rebuild endpoint-dependent state or to show a notice.
pub trait Host: Send + Sync {
    fn recreate(&self);
    fn notify(&self, notice: Notice);
}
