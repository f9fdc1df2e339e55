//! NPS survey dispatch: email content, delivery and the dispatcher job.

pub mod dispatcher;
pub mod email;
pub mod mailer;

pub use dispatcher::{DispatchReport, SurveyDispatcher};
pub use email::OutboundEmail;
pub use mailer::{Mailer, SmtpMailer};
