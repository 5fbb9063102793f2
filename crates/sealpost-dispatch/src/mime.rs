//! `multipart/related` assembly for MIME recipients.

use std::collections::BTreeMap;
use std::error::Error as StdError;

use base64::Engine as _;
use lettre::message::header::{
    ContentDisposition, ContentId, ContentTransferEncoding, ContentType, Header, HeaderName,
    HeaderValue,
};
use lettre::message::{MultiPart, SinglePart};
use rand::RngCore;

use crate::error::BuilderError;
use crate::metadata::PreparedAttachment;

/// `Content-Language` on the HTML part; lettre has no typed header for it.
#[derive(Debug, Clone)]
struct ContentLanguage(String);

impl Header for ContentLanguage {
    fn name() -> HeaderName {
        HeaderName::new_from_ascii_str("Content-Language")
    }

    fn parse(s: &str) -> Result<Self, Box<dyn StdError + Send + Sync>> {
        Ok(Self(s.to_owned()))
    }

    fn display(&self) -> HeaderValue {
        HeaderValue::new(Self::name(), self.0.clone())
    }
}

/// Random hex boundary of `bytes` random bytes.
pub fn random_boundary(bytes: usize) -> String {
    let mut raw = vec![0u8; bytes];
    rand::rngs::OsRng.fill_bytes(&mut raw);
    hex::encode(raw)
}

/// Build the MIME body: the HTML part first, then one base64 part per attachment.
pub fn build_mime_body(
    html_body: &str,
    attachments: &[PreparedAttachment],
    encoded_attachments: &BTreeMap<String, String>,
    boundary: &str,
) -> Result<Vec<u8>, BuilderError> {
    let html = SinglePart::builder()
        .header(ContentType::TEXT_HTML)
        .header(ContentTransferEncoding::QuotedPrintable)
        .header(ContentLanguage("en-US".into()))
        .body(html_body.to_owned());

    let mut multipart = MultiPart::related().boundary(boundary).singlepart(html);

    for attachment in attachments {
        let reference = &attachment.reference;
        let encoded = encoded_attachments.get(&reference.id).ok_or_else(|| {
            BuilderError::MimeAssembly(format!("attachment {} has no content", reference.id))
        })?;
        let content = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| BuilderError::MimeAssembly(format!("attachment {}: {e}", reference.id)))?;

        let content_type = ContentType::parse(&format!(
            "{}; {}",
            reference.mime_type,
            name_parameter(&reference.file_name)
        ))
        .map_err(|e| BuilderError::MimeAssembly(format!("attachment {}: {e}", reference.id)))?;

        let mut part = SinglePart::builder()
            .header(content_type)
            .header(ContentTransferEncoding::Base64)
            .header(ContentDisposition::attachment(&reference.file_name));
        if let Some(cid) = &reference.content_id {
            part = part.header(ContentId::from(format!("<{}>", cid.trim_matches(['<', '>']))));
        }
        multipart = multipart.singlepart(part.body(content));
    }

    Ok(multipart.formatted())
}

/// `name` parameter for an attachment's Content-Type. Names that cannot sit
/// in a plain quoted string are RFC 2231 encoded.
fn name_parameter(file_name: &str) -> String {
    let quotable = file_name
        .bytes()
        .all(|b| (b.is_ascii_graphic() || b == b' ') && b != b'"' && b != b'\\');
    if quotable {
        return format!("name=\"{file_name}\"");
    }

    let mut encoded = String::from("name*=utf-8''");
    for b in file_name.bytes() {
        if b.is_ascii_alphanumeric() || b"!#$&+-.^_`|~".contains(&b) {
            encoded.push(char::from(b));
        } else {
            encoded.push_str(&format!("%{b:02X}"));
        }
    }
    encoded
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::AttachmentRef;
    use sealpost_crypto::{SessionAlgorithm, SessionKey};

    fn attachment(id: &str, name: &str, cid: Option<&str>) -> PreparedAttachment {
        PreparedAttachment {
            reference: AttachmentRef {
                id: id.into(),
                file_name: name.into(),
                mime_type: "image/png".into(),
                content_id: cid.map(Into::into),
                key_packet: Vec::new(),
            },
            session_key: SessionKey::generate(SessionAlgorithm::Aes256),
        }
    }

    #[test]
    fn boundary_is_hex_of_requested_length() {
        let boundary = random_boundary(20);
        assert_eq!(boundary.len(), 40);
        assert!(boundary.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(boundary, random_boundary(20));
    }

    #[test]
    fn html_only_body() {
        let body = build_mime_body("<p>hi</p>", &[], &BTreeMap::new(), "b0undary").unwrap();
        let text = String::from_utf8(body).unwrap();

        assert!(text.contains("multipart/related"));
        assert!(text.contains("--b0undary"));
        assert!(text.contains("text/html; charset=utf-8"));
        assert!(text.contains("Content-Transfer-Encoding: quoted-printable"));
        assert!(text.contains("Content-Language: en-US"));
    }

    #[test]
    fn attachments_become_base64_parts() {
        let attachments = vec![attachment("att-1", "logo.png", Some("logo@sealpost"))];
        let mut encoded = BTreeMap::new();
        encoded.insert("att-1".to_string(), "iVBORw0KGgo=".to_string());

        let body = build_mime_body("<img src=\"cid:logo@sealpost\">", &attachments, &encoded, "bnd")
            .unwrap();
        let text = String::from_utf8(body).unwrap();

        assert!(text.contains("image/png"));
        assert!(text.contains("logo.png"));
        assert!(text.contains("Content-Transfer-Encoding: base64"));
        assert!(text.contains("Content-ID: <logo@sealpost>"));
        assert!(text.contains("Content-Disposition: attachment"));
    }

    #[test]
    fn plain_names_stay_quoted() {
        assert_eq!(name_parameter("Q3 report.pdf"), "name=\"Q3 report.pdf\"");
        assert_eq!(name_parameter("résumé.pdf"), "name*=utf-8''r%C3%A9sum%C3%A9.pdf");
    }

    #[test]
    fn quotes_and_backslashes_in_names_are_encoded() {
        let attachments = vec![
            attachment("att-1", "my \"final\" report.pdf", None),
            attachment("att-2", r"a\b.pdf", None),
        ];
        let mut encoded = BTreeMap::new();
        encoded.insert("att-1".to_string(), "JVBERi0=".to_string());
        encoded.insert("att-2".to_string(), "JVBERi0=".to_string());

        let body = build_mime_body("<p>see attached</p>", &attachments, &encoded, "bnd").unwrap();
        let text = String::from_utf8(body).unwrap();

        assert!(text.contains("name*=utf-8''my%20%22final%22%20report.pdf"));
        assert!(text.contains("name*=utf-8''a%5Cb.pdf"));
        assert!(!text.contains(r#"name="a\b.pdf""#));
    }

    #[test]
    fn missing_encoded_content_fails() {
        let attachments = vec![attachment("att-9", "a.png", None)];
        assert!(matches!(
            build_mime_body("x", &attachments, &BTreeMap::new(), "b"),
            Err(BuilderError::MimeAssembly(_))
        ));
    }
}
