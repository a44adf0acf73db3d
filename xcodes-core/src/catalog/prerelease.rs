//! Prerelease scraping.
//!
//! The downloads catalog only lists GM seeds; betas appear on the
//! `/download/` listing page as plain HTML. Two shapes are handled: anchor
//! tags linking straight at `Xcode_<version>.(dmg|xip)` artifacts, and -
//! when no anchors match - a single "platform-title ... beta"/"... GM"
//! blurb with a download button.

use once_cell::sync::Lazy;
use regex::Regex;

use super::release::Xcode;

static ANCHOR_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"<a[^>]*?href="([^"]*?/Xcode[^"]*?/Xcode_([^"]+?)\.(dmg|xip))""#).unwrap()
});

static BETA_BLURB_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"platform-title[^\n]*Xcode[^\n]* beta[^\n]*</p>").unwrap());

static GM_BLURB_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"Xcode[^\n]* GM[^\n]*</p>").unwrap());

static BUTTON_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"<button [^\n]*?"([^"]+?\.(dmg|xip))"[^\n]*?</button>"#).unwrap());

static NOTES_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"<a[^>]+?href="(/go/\?id=xcode-[^"]+?)""#).unwrap());

static TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]*>").unwrap());

/// Scrape prerelease entries out of the listing page body.
pub fn scan(body: &str) -> Vec<Xcode> {
    let mut found: Vec<Xcode> = ANCHOR_RE
        .captures_iter(body)
        .map(|captures| {
            let link = &captures[1];
            let name = captures[2].trim().replace('_', " ");
            let notes = release_notes_for(body, link);
            Xcode::from_prerelease(&name, link, notes.as_deref())
        })
        .collect();

    if found.is_empty() {
        if let Some(xcode) = scan_blurb(body) {
            found.push(xcode);
        }
    }

    found
}

/// The release notes PDF sits next to the artifact in the same remote
/// directory; resolve it by searching the page for a sibling `.pdf` path.
fn release_notes_for(body: &str, link: &str) -> Option<String> {
    let (_, path) = link.split_once("path=")?;
    let parent = &path[..path.rfind('/')? + 1];

    let pdf_re = Regex::new(&format!(r#"{}([^\s"]+?\.pdf)"#, regex::escape(parent))).ok()?;
    let captures = pdf_re.captures(body)?;
    Some(format!("{}{}", parent, &captures[1]))
}

/// Fallback for pages without artifact anchors: a single highlighted beta
/// (or GM) blurb with a download button.
fn scan_blurb(body: &str) -> Option<Xcode> {
    let blurb = BETA_BLURB_RE
        .find(body)
        .or_else(|| GM_BLURB_RE.find(body))?
        .as_str();

    let text = TAG_RE.replace_all(blurb, "");
    let name = text.rsplit_once("Xcode ").map(|(_, v)| v.trim())?;

    let link = BUTTON_RE.captures(body)?.get(1)?.as_str().to_string();
    let notes = NOTES_RE
        .captures(body)
        .map(|captures| captures[1].to_string());

    Some(Xcode::from_prerelease(name, &link, notes.as_deref()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use semver::Version;

    #[test]
    fn scans_anchor_entries() {
        let body = r#"
            <a href="/services-account/download?path=/Developer_Tools/Xcode_12.5_beta/Xcode_12.5_beta.xip">Xcode 12.5 beta</a>
            other text /Developer_Tools/Xcode_12.5_beta/Release_Notes.pdf trailing
        "#;

        let found = scan(body);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, "12.5 beta");
        assert_eq!(found[0].version, Version::new(12, 5, 0));
        assert!(found[0]
            .release_notes_url
            .as_deref()
            .unwrap()
            .ends_with("Release_Notes.pdf"));
    }

    #[test]
    fn falls_back_to_blurb() {
        let body = r#"
            <p class="platform-title">Download <strong>Xcode 11 beta 3</strong></p>
            <button class="dl" value="/Developer_Tools/Xcode_11_Beta_3/Xcode_11_Beta_3.xip">Download</button>
            <a href="/go/?id=xcode-11-beta-rn">Release Notes</a>
        "#;

        let found = scan(body);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, "11 beta 3");
        assert_eq!(found[0].version, Version::new(11, 0, 0));
        // Button links are bare paths served from the portal host directly.
        assert_eq!(
            found[0].url,
            "https://developer.apple.com/Developer_Tools/Xcode_11_Beta_3/Xcode_11_Beta_3.xip"
        );
    }

    #[test]
    fn empty_page_yields_nothing() {
        assert!(scan("<html><body>nothing here</body></html>").is_empty());
    }
}
