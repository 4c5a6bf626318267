//! Extraction of the top entry title from RSS 2.0 and Atom documents.

use roxmltree::{Document, Node};

use super::FetchError;

/// Returns the title of the first `item` (RSS) or `entry` (Atom) in `xml`.
///
/// An entry without a `title` element yields an empty string; the caller
/// decides how to label it.
///
/// # Errors
///
/// - [`FetchError::Malformed`]: the document is not well-formed XML or is
///   neither an RSS nor an Atom feed.
/// - [`FetchError::EmptyFeed`]: the feed parsed but contains no entries.
pub fn top_entry_title(xml: &str) -> Result<String, FetchError> {
    let document =
        Document::parse(xml).map_err(|err| FetchError::Malformed(format!("invalid feed XML: {err}")))?;

    let root = document.root_element();
    let entry_tag = match root.tag_name().name() {
        "rss" | "RDF" => "item",
        "feed" => "entry",
        other => {
            return Err(FetchError::Malformed(format!(
                "unexpected root element <{other}>"
            )));
        }
    };

    let entry = root
        .descendants()
        .find(|node| node.is_element() && node.tag_name().name() == entry_tag)
        .ok_or(FetchError::EmptyFeed)?;

    Ok(entry
        .children()
        .find(|child| child.is_element() && child.tag_name().name() == "title")
        .map(element_text)
        .unwrap_or_default())
}

// Concatenates all text (including CDATA) beneath `node`, trimmed.
fn element_text(node: Node<'_, '_>) -> String {
    node.descendants()
        .filter(Node::is_text)
        .filter_map(|text| text.text())
        .collect::<String>()
        .trim()
        .to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    const RSS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0" xmlns:ht="https://trends.google.com/trending/rss">
  <channel>
    <title>Daily Search Trends</title>
    <item>
      <title>solar eclipse</title>
      <ht:approx_traffic>500000+</ht:approx_traffic>
    </item>
    <item>
      <title>second place</title>
    </item>
  </channel>
</rss>"#;

    #[test]
    fn rss_first_item_title() {
        assert_eq!(top_entry_title(RSS).unwrap(), "solar eclipse");
    }

    #[test]
    fn channel_title_is_not_an_entry() {
        let xml = r#"<rss><channel><title>Feed</title></channel></rss>"#;
        assert!(matches!(top_entry_title(xml), Err(FetchError::EmptyFeed)));
    }

    #[test]
    fn atom_first_entry_title() {
        let xml = r#"<feed xmlns="http://www.w3.org/2005/Atom">
            <title>Feed</title>
            <entry><title>atom top</title></entry>
            <entry><title>atom second</title></entry>
        </feed>"#;
        assert_eq!(top_entry_title(xml).unwrap(), "atom top");
    }

    #[test]
    fn cdata_and_entities_are_decoded() {
        let xml = r#"<rss><channel><item><title><![CDATA[ Tom &amp; Jerry ]]></title></item></channel></rss>"#;
        assert_eq!(top_entry_title(xml).unwrap(), "Tom &amp; Jerry");

        let xml = r#"<rss><channel><item><title>Q&amp;A</title></item></channel></rss>"#;
        assert_eq!(top_entry_title(xml).unwrap(), "Q&A");
    }

    #[test]
    fn entry_without_title_is_empty_string() {
        let xml = r#"<rss><channel><item><link>x</link></item></channel></rss>"#;
        assert_eq!(top_entry_title(xml).unwrap(), "");
    }

    #[test]
    fn html_error_page_is_malformed() {
        assert!(matches!(
            top_entry_title("<html><body>429</body></html>"),
            Err(FetchError::Malformed(_))
        ));
        assert!(matches!(
            top_entry_title("not xml at all"),
            Err(FetchError::Malformed(_))
        ));
    }
}
