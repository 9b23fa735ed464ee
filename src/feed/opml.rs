use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::path::Path;
use thiserror::Error;

/// SEC-003: Maximum allowed nesting depth for OPML outline elements.
/// Counts every outline level, self-closing leaves included. The walker
/// recurses once per level, so this also bounds task nesting.
pub const MAX_OPML_DEPTH: usize = 128;

/// Type tag that marks an outline as a feed to verify.
const FEED_TYPE: &str = "rss";

/// Errors that can occur while loading an OPML file.
#[derive(Debug, Error)]
pub enum OpmlError {
    /// SEC-003: OPML nesting depth exceeds safety limit.
    #[error("OPML nesting depth exceeds maximum of {0} levels")]
    MaxDepthExceeded(usize),

    /// XML parsing failed.
    #[error("XML parse error: {0}")]
    XmlParse(String),

    /// The document root is not an `<opml>` element.
    #[error("Expected <opml> root element, found {0}")]
    UnexpectedRoot(String),

    /// The document contains no `<body>` element.
    #[error("OPML document has no <body> element")]
    MissingBody,

    /// File I/O error.
    #[error("Failed to read OPML file: {0}")]
    Io(#[from] std::io::Error),
}

/// One `<outline>` entry of the subscription tree.
///
/// Nodes are built once by the loader and never mutated. A node can be a
/// feed, a folder, or both at the same time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutlineNode {
    /// Display name, from `text` with `title` as fallback.
    pub text: String,
    /// Raw `type` attribute. `"rss"` marks a feed.
    pub kind: String,
    /// Feed URL from `xmlUrl`. Empty for folders.
    pub xml_url: String,
    /// Site URL from `htmlUrl`, unused by verification.
    pub html_url: Option<String>,
    /// Nested outlines in document order.
    pub children: Vec<OutlineNode>,
}

impl OutlineNode {
    /// Creates a feed node with the given display text and URL.
    pub fn feed(text: impl Into<String>, xml_url: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            kind: FEED_TYPE.to_string(),
            xml_url: xml_url.into(),
            ..Self::default()
        }
    }

    /// Creates a folder node holding `children`.
    pub fn folder(text: impl Into<String>, children: Vec<OutlineNode>) -> Self {
        Self {
            text: text.into(),
            children,
            ..Self::default()
        }
    }

    /// Whether this node's type tag marks it as a feed to verify.
    pub fn is_feed(&self) -> bool {
        self.kind == FEED_TYPE
    }

    /// Number of feed-typed nodes in this subtree, including `self`.
    pub fn feed_count(&self) -> usize {
        usize::from(self.is_feed()) + count_feeds(&self.children)
    }
}

/// Counts feed-typed nodes across a list of subtrees.
pub fn count_feeds(nodes: &[OutlineNode]) -> usize {
    nodes.iter().map(OutlineNode::feed_count).sum()
}

/// A parsed OPML document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OpmlDocument {
    /// Contents of `<head><title>`, if present.
    pub title: Option<String>,
    /// Top-level outlines of `<body>`.
    pub outlines: Vec<OutlineNode>,
}

/// Reads and parses an OPML file from disk.
///
/// # Errors
///
/// Returns [`OpmlError::Io`] if the file cannot be read, and any of the
/// parse errors from [`parse_str`] otherwise.
pub async fn parse(path: &Path) -> Result<OpmlDocument, OpmlError> {
    let content = tokio::fs::read_to_string(path).await?;
    parse_str(&content)
}

/// Parses OPML content into an outline tree.
///
/// Only outlines inside `<body>` are kept. Attributes other than `text`,
/// `title`, `type`, `xmlUrl` and `htmlUrl` are ignored.
///
/// # Security
///
/// SEC-002: quick-xml (0.37) never parses `<!ENTITY>` declarations. Entity
/// resolution only covers the 5 XML builtins, so custom entities such as
/// `&xxe;` produce an error from `decode_and_unescape_value()` instead of
/// expanding.
pub fn parse_str(content: &str) -> Result<OpmlDocument, OpmlError> {
    let mut reader = Reader::from_str(content);
    reader.config_mut().trim_text(true);

    let mut doc = OpmlDocument::default();
    let mut buf = Vec::new();
    // Open outlines, innermost last. Length is the current nesting depth.
    let mut stack: Vec<OutlineNode> = Vec::new();
    let mut open_elements: usize = 0;
    let mut seen_root = false;
    let mut seen_body = false;
    let mut in_body = false;
    let mut in_title = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                let name = e.name();
                if !seen_root {
                    check_root(name.as_ref())?;
                    seen_root = true;
                }
                open_elements += 1;
                match name.as_ref() {
                    b"body" if open_elements == 2 => {
                        seen_body = true;
                        in_body = true;
                    }
                    b"title" if open_elements == 3 && !in_body => in_title = true,
                    b"outline" if in_body => {
                        if stack.len() >= MAX_OPML_DEPTH {
                            return Err(OpmlError::MaxDepthExceeded(MAX_OPML_DEPTH));
                        }
                        stack.push(outline_from_attributes(&e, &reader)?);
                    }
                    _ => {}
                }
            }
            Ok(Event::Empty(e)) => {
                let name = e.name();
                if !seen_root {
                    check_root(name.as_ref())?;
                    seen_root = true;
                }
                match name.as_ref() {
                    b"body" if open_elements == 1 => seen_body = true,
                    b"outline" if in_body => {
                        if stack.len() >= MAX_OPML_DEPTH {
                            return Err(OpmlError::MaxDepthExceeded(MAX_OPML_DEPTH));
                        }
                        let node = outline_from_attributes(&e, &reader)?;
                        attach(&mut stack, &mut doc.outlines, node);
                    }
                    _ => {}
                }
            }
            Ok(Event::Text(t)) if in_title => {
                let text = t
                    .unescape()
                    .map_err(|e| OpmlError::XmlParse(e.to_string()))?;
                doc.title = Some(text.into_owned());
            }
            Ok(Event::End(e)) => {
                match e.name().as_ref() {
                    b"outline" if in_body => {
                        if let Some(node) = stack.pop() {
                            attach(&mut stack, &mut doc.outlines, node);
                        }
                    }
                    b"body" if open_elements == 2 => in_body = false,
                    b"title" => in_title = false,
                    _ => {}
                }
                open_elements = open_elements.saturating_sub(1);
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(OpmlError::XmlParse(e.to_string())),
            _ => {}
        }
        buf.clear();
    }

    if !seen_root {
        return Err(OpmlError::XmlParse("document is empty".to_string()));
    }
    if open_elements != 0 || !stack.is_empty() {
        return Err(OpmlError::XmlParse(
            "unexpected end of document: unclosed elements".to_string(),
        ));
    }
    if !seen_body {
        return Err(OpmlError::MissingBody);
    }

    Ok(doc)
}

fn check_root(name: &[u8]) -> Result<(), OpmlError> {
    if name == b"opml" {
        Ok(())
    } else {
        Err(OpmlError::UnexpectedRoot(
            String::from_utf8_lossy(name).into_owned(),
        ))
    }
}

/// Appends a finished node to its parent, or to the root list.
fn attach(stack: &mut [OutlineNode], roots: &mut Vec<OutlineNode>, node: OutlineNode) {
    match stack.last_mut() {
        Some(parent) => parent.children.push(node),
        None => roots.push(node),
    }
}

fn outline_from_attributes(
    e: &BytesStart<'_>,
    reader: &Reader<&[u8]>,
) -> Result<OutlineNode, OpmlError> {
    let mut node = OutlineNode::default();
    let mut title = None;
    let decoder = reader.decoder();

    for attr_result in e.attributes() {
        let attr = match attr_result {
            Ok(attr) => attr,
            Err(e) => {
                tracing::warn!(error = %e, "Skipping malformed OPML attribute");
                continue;
            }
        };
        let value = || {
            attr.decode_and_unescape_value(decoder)
                .map(|v| v.into_owned())
                .map_err(|e| OpmlError::XmlParse(e.to_string()))
        };
        match attr.key.as_ref() {
            b"text" => node.text = value()?,
            b"title" => title = Some(value()?),
            b"type" => node.kind = value()?,
            b"xmlUrl" => node.xml_url = value()?,
            b"htmlUrl" => node.html_url = Some(value()?),
            _ => {}
        }
    }

    if node.text.is_empty() {
        if let Some(title) = title {
            node.text = title;
        }
    }

    Ok(node)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_nested_outlines() {
        let content = r#"<?xml version="1.0" encoding="UTF-8"?>
<opml version="2.0">
  <head><title>Test Feeds</title></head>
  <body>
    <outline text="Blogs" title="Blogs">
      <outline type="rss" text="Example Blog" xmlUrl="https://example.com/feed.xml" htmlUrl="https://example.com"/>
      <outline type="rss" text="No HTML" xmlUrl="https://nohtml.com/rss"/>
    </outline>
    <outline type="rss" text="Top Level" xmlUrl="https://top.example.org/atom.xml"/>
  </body>
</opml>"#;

        let doc = parse_str(content).expect("Failed to parse OPML content with nested outlines");
        assert_eq!(doc.title.as_deref(), Some("Test Feeds"));
        assert_eq!(doc.outlines.len(), 2);

        let blogs = &doc.outlines[0];
        assert_eq!(blogs.text, "Blogs");
        assert!(!blogs.is_feed());
        assert_eq!(blogs.children.len(), 2);
        assert_eq!(blogs.children[0].xml_url, "https://example.com/feed.xml");
        assert_eq!(
            blogs.children[0].html_url,
            Some("https://example.com".to_string())
        );
        assert!(blogs.children[1].is_feed());
        assert_eq!(blogs.children[1].html_url, None);

        assert_eq!(doc.outlines[1].text, "Top Level");
        assert_eq!(count_feeds(&doc.outlines), 3);
    }

    #[test]
    fn test_feed_and_folder_at_once() {
        let content = r#"<opml version="2.0"><body>
    <outline type="rss" text="Parent" xmlUrl="https://parent.example/feed">
        <outline type="rss" text="Child" xmlUrl="https://child.example/feed"/>
    </outline>
</body></opml>"#;

        let doc = parse_str(content).unwrap();
        assert_eq!(doc.outlines.len(), 1);
        assert!(doc.outlines[0].is_feed());
        assert_eq!(doc.outlines[0].children.len(), 1);
        assert_eq!(doc.outlines[0].feed_count(), 2);
    }

    #[test]
    fn test_only_rss_type_is_a_feed() {
        let content = r#"<opml version="2.0"><body>
    <outline type="link" text="Link" xmlUrl="https://link.example/feed"/>
    <outline text="Untyped" xmlUrl="https://untyped.example/feed"/>
    <outline type="rss" text="Feed" xmlUrl="https://feed.example/feed"/>
</body></opml>"#;

        let doc = parse_str(content).unwrap();
        let feeds: Vec<bool> = doc.outlines.iter().map(OutlineNode::is_feed).collect();
        assert_eq!(feeds, vec![false, false, true]);
    }

    #[test]
    fn test_text_falls_back_to_title() {
        let content = r#"<opml version="2.0"><body>
    <outline type="rss" title="Title Only" xmlUrl="https://titleonly.com/feed"/>
</body></opml>"#;

        let doc = parse_str(content).unwrap();
        assert_eq!(doc.outlines[0].text, "Title Only");
    }

    #[test]
    fn test_feed_without_url_is_kept() {
        let content = r#"<opml version="2.0"><body>
    <outline type="rss" text="Broken"/>
</body></opml>"#;

        let doc = parse_str(content).unwrap();
        assert!(doc.outlines[0].is_feed());
        assert_eq!(doc.outlines[0].xml_url, "");
    }

    #[test]
    fn test_outlines_outside_body_ignored() {
        let content = r#"<opml version="2.0">
    <head><title>T</title><outline type="rss" xmlUrl="https://head.example/feed"/></head>
    <body><outline type="rss" xmlUrl="https://body.example/feed"/></body>
</opml>"#;

        let doc = parse_str(content).unwrap();
        assert_eq!(doc.outlines.len(), 1);
        assert_eq!(doc.outlines[0].xml_url, "https://body.example/feed");
    }

    #[test]
    fn test_empty_body() {
        let doc = parse_str(r#"<opml version="2.0"><body></body></opml>"#).unwrap();
        assert!(doc.outlines.is_empty());

        let doc = parse_str(r#"<opml version="2.0"><body/></opml>"#).unwrap();
        assert!(doc.outlines.is_empty());
    }

    #[test]
    fn test_missing_body_error() {
        let result = parse_str(r#"<opml version="2.0"><head><title>x</title></head></opml>"#);
        assert!(matches!(result, Err(OpmlError::MissingBody)));
    }

    #[test]
    fn test_wrong_root_error() {
        let result = parse_str(r#"<rss version="2.0"><channel></channel></rss>"#);
        match result {
            Err(OpmlError::UnexpectedRoot(name)) => assert_eq!(name, "rss"),
            other => panic!("Expected UnexpectedRoot, got {:?}", other),
        }
    }

    #[test]
    fn test_malformed_xml_error() {
        assert!(parse_str("<not valid xml").is_err());
        assert!(parse_str("").is_err());
        assert!(parse_str(r#"<opml><body><outline text="a">"#).is_err());
    }

    #[test]
    fn test_xxe_entity_not_expanded() {
        // SEC-002: quick-xml (0.37) does not parse <!ENTITY> declarations.
        let malicious_opml = r#"<?xml version="1.0"?>
<!DOCTYPE opml [<!ENTITY xxe SYSTEM "file:///etc/passwd">]>
<opml version="2.0">
    <body>
        <outline type="rss" text="&xxe;" xmlUrl="https://example.com/feed.xml"/>
    </body>
</opml>"#;

        match parse_str(malicious_opml) {
            Ok(doc) => {
                for node in &doc.outlines {
                    assert!(
                        !node.text.contains("root:"),
                        "XXE expansion detected! Outline text contains passwd content"
                    );
                }
            }
            Err(_) => {
                // Rejection (UnrecognizedEntity error) is the expected behavior
            }
        }
    }

    #[test]
    fn test_deeply_nested_opml_rejected() {
        let levels = MAX_OPML_DEPTH + 10;
        let mut opml = String::from(r#"<?xml version="1.0"?><opml version="2.0"><body>"#);
        for _ in 0..levels {
            opml.push_str(r#"<outline text="level">"#);
        }
        for _ in 0..levels {
            opml.push_str("</outline>");
        }
        opml.push_str("</body></opml>");

        let err = parse_str(&opml).unwrap_err();
        let err_msg = err.to_string();
        assert!(
            err_msg.contains("depth") && err_msg.contains("128"),
            "Error should mention depth limit: {}",
            err_msg
        );
    }

    fn nested_opml(folders: usize) -> String {
        let mut opml = String::from(r#"<?xml version="1.0"?><opml version="2.0"><body>"#);
        for _ in 0..folders {
            opml.push_str(r#"<outline text="level">"#);
        }
        opml.push_str(r#"<outline type="rss" text="Deep Feed" xmlUrl="https://deep.example.com/feed"/>"#);
        for _ in 0..folders {
            opml.push_str("</outline>");
        }
        opml.push_str("</body></opml>");
        opml
    }

    #[test]
    fn test_nesting_at_depth_limit_allowed() {
        // Self-closing leaf is the last of MAX_OPML_DEPTH levels
        let doc = parse_str(&nested_opml(MAX_OPML_DEPTH - 1))
            .expect("OPML at exactly max depth should be allowed");
        assert_eq!(count_feeds(&doc.outlines), 1);
    }

    #[test]
    fn test_self_closing_leaf_counts_toward_depth() {
        let err = parse_str(&nested_opml(MAX_OPML_DEPTH)).unwrap_err();
        assert!(matches!(err, OpmlError::MaxDepthExceeded(MAX_OPML_DEPTH)));
    }

    #[test]
    fn test_url_attribute_is_unescaped() {
        let content = r#"<opml version="2.0"><body>
    <outline type="rss" text="Q" xmlUrl="https://example.com/feed?a=1&amp;b=2"/>
</body></opml>"#;

        let doc = parse_str(content).unwrap();
        assert_eq!(doc.outlines[0].xml_url, "https://example.com/feed?a=1&b=2");
    }

    #[test]
    fn test_url_attribute_kept_verbatim() {
        let content = r#"<opml version="2.0"><body>
    <outline type="rss" text="Padded" xmlUrl=" https://example.com/feed "/>
</body></opml>"#;

        let doc = parse_str(content).unwrap();
        assert_eq!(doc.outlines[0].xml_url, " https://example.com/feed ");
    }

    #[tokio::test]
    async fn test_parse_missing_file() {
        let path = std::env::temp_dir().join("feedaudit_test_missing_file.opml");
        let _ = std::fs::remove_file(&path);
        assert!(matches!(parse(&path).await, Err(OpmlError::Io(_))));
    }

    #[tokio::test]
    async fn test_parse_file() {
        let dir = std::env::temp_dir().join("feedaudit_test_parse_file");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("feeds.opml");
        std::fs::write(
            &path,
            r#"<opml version="2.0"><body><outline type="rss" text="A" xmlUrl="https://a.example/feed"/></body></opml>"#,
        )
        .unwrap();

        let doc = parse(&path).await.unwrap();
        assert_eq!(doc.outlines.len(), 1);

        std::fs::remove_dir_all(&dir).ok();
    }
}
