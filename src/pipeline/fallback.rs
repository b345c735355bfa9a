//! Fallback Resolver: default text for references generation left unresolved.

use crate::model::{ImageReference, ResultMap};
use tracing::debug;

/// Give every image reference with no entry at all the fallback text.
///
/// Entries that exist are never touched, whatever they hold: an empty
/// string is a decorative signal, not a missing result. Returns the number
/// of references that received the fallback.
pub fn resolve_defaults(
    references: &[ImageReference],
    results: &mut ResultMap,
    text: &str,
) -> usize {
    let mut applied = 0;
    for reference in references {
        if results.insert_fallback(reference.id, text) {
            debug!("Figure {}: using fallback text", reference.id);
            applied += 1;
        }
    }
    applied
}

/// `Link to <domain>` for a link whose description could not be generated.
///
/// A leading `www.` is dropped. Targets without a host (`mailto:`, relative
/// paths) use the target itself.
pub fn link_fallback_text(target: &str) -> String {
    let target = target.trim();
    let host = reqwest::Url::parse(target)
        .ok()
        .and_then(|url| url.host_str().map(str::to_string));
    match host {
        Some(host) => format!("Link to {}", host.strip_prefix("www.").unwrap_or(&host)),
        None => format!("Link to {}", target.strip_prefix("mailto:").unwrap_or(target)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Description, DescriptionResult, Provenance};

    fn reference(id: u32) -> ImageReference {
        ImageReference {
            id,
            payload_path: format!("fig{id}.png"),
            context: String::new(),
        }
    }

    #[test]
    fn only_missing_entries_get_the_default() {
        let mut results: ResultMap = vec![
            DescriptionResult {
                reference_id: 5,
                description: Description::decorative(),
            },
            DescriptionResult {
                reference_id: 7,
                description: Description::Text("a red bicycle".into()),
            },
        ]
        .into_iter()
        .collect();

        let refs = [reference(5), reference(7), reference(9)];
        let applied = resolve_defaults(&refs, &mut results, "No description available");

        assert_eq!(applied, 1);
        assert_eq!(results.get(5), Some(&Description::decorative()));
        assert_eq!(
            results.get(9),
            Some(&Description::Text("No description available".into()))
        );
        assert_eq!(results.provenance(9), Some(Provenance::Fallback));
        assert_eq!(results.provenance(7), Some(Provenance::Generated));
    }

    #[test]
    fn artifacts_are_not_overridden() {
        let mut results: ResultMap = std::iter::once(DescriptionResult {
            reference_id: 3,
            description: Description::Artifact,
        })
        .collect();
        assert_eq!(resolve_defaults(&[reference(3)], &mut results, "x"), 0);
        assert_eq!(results.get(3), Some(&Description::Artifact));
    }

    #[test]
    fn link_fallback_uses_domain() {
        assert_eq!(
            link_fallback_text("https://www.example.org/annual/report.pdf"),
            "Link to example.org"
        );
        assert_eq!(link_fallback_text("http://docs.rs"), "Link to docs.rs");
        assert_eq!(
            link_fallback_text("mailto:info@example.org"),
            "Link to info@example.org"
        );
    }
}
