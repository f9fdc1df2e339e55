//! NPS survey email content.

use uuid::Uuid;

/// Subject line of every survey email.
pub const SUBJECT: &str = "What do you think about Hem? Two quick questions to help us improve!";

/// Scores offered in the email, one link each.
pub const SCORES: std::ops::RangeInclusive<u8> = 1..=10;

const US_SENDER_NAME: &str = "Theresa at Hem";
const DEFAULT_SENDER_NAME: &str = "Mathilda at Hem";

/// A rendered email ready for a `Mailer`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundEmail {
    pub to: String,
    pub from_name: String,
    pub from_address: String,
    pub subject: String,
    pub html_body: String,
}

/// Sender display name by the recipient's region name.
///
/// Only `us` gets its own sender; every other region, and users without a
/// region, get the default.
pub fn sender_name(region: Option<&str>) -> &'static str {
    match region {
        Some("us") => US_SENDER_NAME,
        _ => DEFAULT_SENDER_NAME,
    }
}

/// Link recording `score` for the request `uuid`.
pub fn score_link(base_url: &str, uuid: &Uuid, score: u8) -> String {
    format!("{base_url}/score/{uuid}/{score}")
}

/// HTML body: a short intro and one link per score.
pub fn render_html(uuid: &Uuid, base_url: &str) -> String {
    let mut links = String::new();
    for score in SCORES {
        links.push_str(&format!(
            r#"<td style="padding:4px"><a href="{href}" style="display:inline-block;padding:8px 12px;border:1px solid #222;color:#222;text-decoration:none">{score}</a></td>"#,
            href = score_link(base_url, uuid, score),
        ));
    }

    format!(
        concat!(
            "<!DOCTYPE html>\n",
            "<html><body style=\"font-family:sans-serif\">\n",
            "<p>Hi,</p>\n",
            "<p>Thanks for shopping with Hem! How likely is it that you would recommend us to a friend or colleague?</p>\n",
            "<table><tr>{links}</tr></table>\n",
            "<p style=\"font-size:12px;color:#888\">1 = not at all likely, 10 = extremely likely</p>\n",
            "<p style=\"font-size:11px;color:#aaa\">Request {uuid}</p>\n",
            "</body></html>\n"
        ),
        links = links,
        uuid = uuid,
    )
}
