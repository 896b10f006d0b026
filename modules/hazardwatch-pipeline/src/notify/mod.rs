pub mod backend;
pub mod dry_run;
pub mod noop;
pub mod slack;

pub use backend::DigestNotifier;
pub use dry_run::DryRunNotifier;
pub use noop::NoopNotifier;
pub use slack::SlackWebhook;
