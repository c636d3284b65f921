//! MIME part tree.
//!
//! Parts are stored flat in document order. Each carries a dotted
//! positional id (`"1"`, `"1.1"`, `"1.2.1"`, ...) and the ids of its
//! parent and children.

use std::collections::HashMap;
use std::ops::Range;

use crate::content_type::{ContentDisposition, ContentType, DispositionKind};
use crate::encoding::TransferEncoding;
use crate::header::Headers;
use crate::scanner::ScannedPart;

/// Id of the top-level part.
pub const ROOT_ID: &str = "1";

/// One MIME entity.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Part {
    id: String,
    parent: Option<String>,
    children: Vec<String>,
    headers: Headers,
    content_type: ContentType,
    disposition: Option<ContentDisposition>,
    content_id: Option<String>,
    transfer_encoding: TransferEncoding,
    header_span: Range<u64>,
    body_span: Range<u64>,
}

impl Part {
    fn from_scan(id: String, parent: Option<String>, scanned: ScannedPart) -> Self {
        let headers = scanned.headers;

        let content_type = headers
            .get("content-type")
            .and_then(|value| ContentType::parse(value).ok())
            .unwrap_or_default();
        let disposition = headers
            .get("content-disposition")
            .map(ContentDisposition::parse)
            .filter(|cd| !cd.kind.as_str().is_empty());
        let content_id = headers
            .get("content-id")
            .map(str::trim)
            .filter(|cid| !cid.is_empty())
            .map(String::from);
        let transfer_encoding = headers
            .get("content-transfer-encoding")
            .map_or(TransferEncoding::SevenBit, TransferEncoding::parse);

        Self {
            id,
            parent,
            children: Vec::new(),
            headers,
            content_type,
            disposition,
            content_id,
            transfer_encoding,
            header_span: scanned.header_span,
            body_span: scanned.body_span,
        }
    }

    /// Dotted positional id, unique within the message.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Id of the enclosing container, `None` for the root.
    #[must_use]
    pub fn parent(&self) -> Option<&str> {
        self.parent.as_deref()
    }

    /// Ids of child parts in document order. Empty for leaves.
    #[must_use]
    pub fn children(&self) -> &[String] {
        &self.children
    }

    /// Part headers in original order.
    #[must_use]
    pub const fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Content type, `text/plain` when the header is absent or invalid.
    #[must_use]
    pub const fn content_type(&self) -> &ContentType {
        &self.content_type
    }

    /// `type/subtype` of the content type.
    #[must_use]
    pub fn mime_type(&self) -> String {
        self.content_type.mime_type()
    }

    /// Charset parameter of the content type.
    #[must_use]
    pub fn charset(&self) -> Option<&str> {
        self.content_type.charset()
    }

    /// Parsed `Content-Disposition`, if present.
    #[must_use]
    pub const fn disposition(&self) -> Option<&ContentDisposition> {
        self.disposition.as_ref()
    }

    /// Disposition type, if a `Content-Disposition` header is present.
    #[must_use]
    pub fn disposition_kind(&self) -> Option<&DispositionKind> {
        self.disposition.as_ref().map(|cd| &cd.kind)
    }

    /// `filename` parameter of `Content-Disposition`.
    #[must_use]
    pub fn disposition_filename(&self) -> Option<&str> {
        self.disposition.as_ref().and_then(ContentDisposition::filename)
    }

    /// `name` parameter of `Content-Type`.
    #[must_use]
    pub fn content_name(&self) -> Option<&str> {
        self.content_type.name()
    }

    /// Value of the `Content-ID` header.
    #[must_use]
    pub fn content_id(&self) -> Option<&str> {
        self.content_id.as_deref()
    }

    /// Content-Transfer-Encoding, `7bit` when absent.
    #[must_use]
    pub const fn transfer_encoding(&self) -> &TransferEncoding {
        &self.transfer_encoding
    }

    /// Byte range of the header block, including the terminating blank line.
    #[must_use]
    pub fn header_span(&self) -> Range<u64> {
        self.header_span.clone()
    }

    /// Byte range of the body. Starts where the header span ends.
    #[must_use]
    pub fn body_span(&self) -> Range<u64> {
        self.body_span.clone()
    }

    /// Returns true for multipart containers with at least one child.
    #[must_use]
    pub fn is_container(&self) -> bool {
        !self.children.is_empty()
    }

    /// Returns true if this part would be listed as an attachment: it has
    /// an `attachment` or `inline` disposition, or a `Content-ID`.
    #[must_use]
    pub fn is_attachment(&self) -> bool {
        matches!(
            self.disposition_kind(),
            Some(DispositionKind::Attachment | DispositionKind::Inline)
        ) || self.content_id.is_some()
    }
}

/// Immutable tree of parts, stored in document order.
#[derive(Debug, Clone)]
pub struct PartTree {
    parts: Vec<Part>,
    index: HashMap<String, usize>,
}

impl PartTree {
    /// Builds the tree from scanner output.
    ///
    /// The scanner emits parents before their children, so ids can be
    /// assigned in a single pass.
    pub(crate) fn build(scanned: Vec<ScannedPart>) -> Self {
        let mut parts: Vec<Part> = Vec::with_capacity(scanned.len());
        let mut index = HashMap::with_capacity(scanned.len());

        for raw in scanned {
            let (id, parent) = match raw.parent {
                None => (ROOT_ID.to_string(), None),
                Some(p) => {
                    let parent = &mut parts[p];
                    let id = format!("{}.{}", parent.id, parent.children.len() + 1);
                    parent.children.push(id.clone());
                    (id, Some(parent.id.clone()))
                }
            };

            index.insert(id.clone(), parts.len());
            parts.push(Part::from_scan(id, parent, raw));
        }

        Self { parts, index }
    }

    /// The top-level part.
    #[must_use]
    pub fn root(&self) -> &Part {
        &self.parts[0]
    }

    /// Looks up a part by id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Part> {
        self.index.get(id).map(|&i| &self.parts[i])
    }

    /// Iterates all parts in document order.
    pub fn iter(&self) -> std::slice::Iter<'_, Part> {
        self.parts.iter()
    }

    /// Iterates the children of a part.
    pub fn children<'a>(&'a self, part: &'a Part) -> impl Iterator<Item = &'a Part> + 'a {
        part.children.iter().filter_map(|id| self.get(id))
    }

    /// Number of parts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.parts.len()
    }

    /// Always false for a built tree.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }
}

impl<'a> IntoIterator for &'a PartTree {
    type Item = &'a Part;
    type IntoIter = std::slice::Iter<'a, Part>;

    fn into_iter(self) -> Self::IntoIter {
        self.parts.iter()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::scanner::scan;

    const NESTED: &str = concat!(
        "Content-Type: multipart/mixed; boundary=o\r\n\r\n",
        "--o\r\n",
        "Content-Type: multipart/alternative; boundary=i\r\n\r\n",
        "--i\r\nContent-Type: text/plain\r\n\r\nplain\r\n",
        "--i\r\nContent-Type: text/html\r\n\r\n<b>html</b>\r\n",
        "--i--\r\n",
        "--o\r\n",
        "Content-Type: image/png; name=\"dot.png\"\r\n",
        "Content-ID: <dot@local>\r\n",
        "Content-Transfer-Encoding: BASE64\r\n\r\n",
        "iVBORw0KGgo=\r\n",
        "--o\r\n",
        "Content-Type: application/pdf\r\n",
        "Content-Disposition: attachment; filename=\"r.pdf\"\r\n\r\n",
        "JVBERg==\r\n",
        "--o--\r\n",
    );

    fn build(text: &str) -> PartTree {
        PartTree::build(scan(text.as_bytes()).unwrap())
    }

    #[test]
    fn test_ids_in_document_order() {
        let tree = build(NESTED);
        let ids: Vec<&str> = tree.iter().map(Part::id).collect();
        assert_eq!(ids, vec!["1", "1.1", "1.1.1", "1.1.2", "1.2", "1.3"]);
    }

    #[test]
    fn test_parent_child_links() {
        let tree = build(NESTED);
        let root = tree.root();
        assert_eq!(root.children(), ["1.1", "1.2", "1.3"]);
        assert!(root.is_container());
        assert_eq!(root.parent(), None);

        let alternative = tree.get("1.1").unwrap();
        assert_eq!(alternative.parent(), Some("1"));
        let kinds: Vec<String> = tree.children(alternative).map(Part::mime_type).collect();
        assert_eq!(kinds, vec!["text/plain", "text/html"]);

        let leaf = tree.get("1.1.2").unwrap();
        assert!(!leaf.is_container());
        assert!(leaf.children().is_empty());
    }

    #[test]
    fn test_sibling_spans_disjoint_and_ordered() {
        let tree = build(NESTED);
        let root = tree.root();
        let spans: Vec<Range<u64>> = tree.children(root).map(Part::body_span).collect();
        for pair in spans.windows(2) {
            assert!(pair[0].end <= pair[1].start);
        }
        for part in &tree {
            assert_eq!(part.header_span().end, part.body_span().start);
            assert!(part.body_span().start <= part.body_span().end);
        }
    }

    #[test]
    fn test_derived_fields() {
        let tree = build(NESTED);

        let image = tree.get("1.2").unwrap();
        assert_eq!(image.content_name(), Some("dot.png"));
        assert_eq!(image.content_id(), Some("<dot@local>"));
        assert_eq!(image.transfer_encoding(), &TransferEncoding::Base64);
        assert_eq!(image.disposition(), None);
        assert!(image.is_attachment());

        let pdf = tree.get("1.3").unwrap();
        assert_eq!(pdf.disposition_kind(), Some(&DispositionKind::Attachment));
        assert_eq!(pdf.disposition_filename(), Some("r.pdf"));
        assert!(pdf.is_attachment());

        let plain = tree.get("1.1.1").unwrap();
        assert_eq!(plain.transfer_encoding(), &TransferEncoding::SevenBit);
        assert!(!plain.is_attachment());
    }

    #[test]
    fn test_default_content_type() {
        let tree = build("Subject: none\n\nbody\n");
        let root = tree.root();
        assert_eq!(root.mime_type(), "text/plain");
        assert_eq!(root.charset(), Some("us-ascii"));
        assert_eq!(tree.len(), 1);
        assert!(tree.get("2").is_none());
    }
}
