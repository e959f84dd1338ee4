// HTML page template for the war status view.

use askama::Template;

use crate::snapshot::Snapshot;

/// The index page. When `error` is set it replaces the war sections.
#[derive(Debug, Template)]
#[template(path = "index.html")]
pub struct IndexPage {
    pub clan_tag: String,
    pub error: Option<String>,
    pub snapshot: Snapshot,
}

impl IndexPage {
    pub fn empty() -> Self {
        IndexPage {
            clan_tag: String::new(),
            error: None,
            snapshot: Snapshot::default(),
        }
    }
}
