//! Ignore-term filtering over extracted records.

use tracing::info;

use crate::scrape::extract::ItemRecord;

/// Case-insensitive containment check across every textual and list
/// field. Each term is tried raw and with spaces normalized to hyphens
/// (matched against the equally normalized field value), so slugged
/// titles are caught too. Any match on any field ignores the item.
pub fn should_ignore(record: &ItemRecord, ignore_terms: &[String]) -> bool {
    for term in ignore_terms {
        let raw = term.to_lowercase();
        let normalized = raw.replace(' ', "-");
        for (field, value) in record {
            for text in value.texts() {
                let haystack = text.to_lowercase();
                if haystack.contains(&raw) || haystack.replace(' ', "-").contains(&normalized) {
                    info!(field, term, "ignoring item, field matches ignore term");
                    return true;
                }
            }
        }
    }
    false
}
