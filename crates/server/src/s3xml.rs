//! The S3 XML dialect: response documents and the lifecycle policy body.
//!
//! Conventions of the AWS RestXml protocol:
//! - namespace `http://s3.amazonaws.com/doc/2006-03-01/`,
//! - lowercase `true`/`false` booleans,
//! - `2006-01-02T15:04:05Z` timestamps,
//! - an XML declaration on every document.

use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesText, Event};
use silo_metadata::models::LifecycleRuleRow;
use silo_metadata::repos::LifecycleRuleSpec;
use std::io::{self, Write};
use time::OffsetDateTime;
use time::macros::format_description;

/// The S3 XML namespace.
pub const S3_XMLNS: &str = "http://s3.amazonaws.com/doc/2006-03-01/";

/// Render an `OffsetDateTime` in the S3 timestamp format.
pub fn format_timestamp(t: OffsetDateTime) -> String {
    let format = format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]Z");
    t.format(&format)
        .unwrap_or_else(|_| t.unix_timestamp().to_string())
}

fn xml_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

/// Render the `<Error>` document.
///
/// Hand-formatted rather than going through the writer: this runs on every
/// failure path, including panic recovery, and must not itself fail.
pub fn error_document(
    code: &str,
    message: &str,
    resource: Option<&str>,
    request_id: Option<&str>,
) -> String {
    let mut doc = String::with_capacity(256);
    doc.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>");
    doc.push_str("<Error><Code>");
    doc.push_str(&xml_escape(code));
    doc.push_str("</Code><Message>");
    doc.push_str(&xml_escape(message));
    doc.push_str("</Message>");
    if let Some(resource) = resource {
        doc.push_str("<Resource>");
        doc.push_str(&xml_escape(resource));
        doc.push_str("</Resource>");
    }
    if let Some(request_id) = request_id {
        doc.push_str("<RequestId>");
        doc.push_str(&xml_escape(request_id));
        doc.push_str("</RequestId>");
    }
    doc.push_str("</Error>");
    doc
}

// ---------------------------------------------------------------------------
// Writer helpers
// ---------------------------------------------------------------------------

fn write_text<W: Write>(writer: &mut Writer<W>, tag: &str, text: &str) -> io::Result<()> {
    writer
        .create_element(tag)
        .write_text_content(BytesText::new(text))?;
    Ok(())
}

fn write_opt_text<W: Write>(
    writer: &mut Writer<W>,
    tag: &str,
    value: Option<&str>,
) -> io::Result<()> {
    if let Some(v) = value {
        write_text(writer, tag, v)?;
    }
    Ok(())
}

fn write_bool<W: Write>(writer: &mut Writer<W>, tag: &str, value: bool) -> io::Result<()> {
    write_text(writer, tag, if value { "true" } else { "false" })
}

fn write_opt_days<W: Write>(
    writer: &mut Writer<W>,
    outer: &str,
    inner: &str,
    value: Option<i64>,
) -> io::Result<()> {
    if let Some(days) = value {
        writer
            .create_element(outer)
            .write_inner_content(|w| write_text(w, inner, &days.to_string()))?;
    }
    Ok(())
}

fn to_document<F>(root: &str, content: F) -> io::Result<String>
where
    F: FnOnce(&mut Writer<&mut Vec<u8>>) -> io::Result<()>,
{
    let mut buf = Vec::with_capacity(512);
    let mut writer = Writer::new(&mut buf);
    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
    writer
        .create_element(root)
        .with_attribute(("xmlns", S3_XMLNS))
        .write_inner_content(content)?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

// ---------------------------------------------------------------------------
// ListAllMyBucketsResult
// ---------------------------------------------------------------------------

/// One bucket entry in the service listing.
pub struct BucketEntry {
    pub name: String,
    pub created_at: OffsetDateTime,
}

/// Render `ListAllMyBucketsResult` for `GET /`.
pub fn list_all_my_buckets(
    owner_id: &str,
    owner_display: &str,
    buckets: &[BucketEntry],
) -> io::Result<String> {
    to_document("ListAllMyBucketsResult", |w| {
        w.create_element("Owner").write_inner_content(|w| {
            write_text(w, "ID", owner_id)?;
            write_text(w, "DisplayName", owner_display)
        })?;
        w.create_element("Buckets").write_inner_content(|w| {
            for bucket in buckets {
                w.create_element("Bucket").write_inner_content(|w| {
                    write_text(w, "Name", &bucket.name)?;
                    write_text(w, "CreationDate", &format_timestamp(bucket.created_at))
                })?;
            }
            Ok(())
        })?;
        Ok(())
    })
}

// ---------------------------------------------------------------------------
// ListBucketResult (ListObjectsV2)
// ---------------------------------------------------------------------------

/// One `Contents` entry of a listing page.
pub struct ListEntry {
    pub key: String,
    pub etag: Option<String>,
    pub size: i64,
    pub last_modified: OffsetDateTime,
}

/// The assembled ListObjectsV2 response.
pub struct ListBucketDoc {
    pub bucket: String,
    pub prefix: String,
    pub delimiter: String,
    pub max_keys: u32,
    pub is_truncated: bool,
    pub key_count: usize,
    pub continuation_token: Option<String>,
    pub next_continuation_token: Option<String>,
    pub start_after: Option<String>,
    pub common_prefixes: Vec<String>,
    pub contents: Vec<ListEntry>,
}

/// Render `ListBucketResult` for `GET /{bucket}?list-type=2`.
pub fn list_bucket_result(doc: &ListBucketDoc) -> io::Result<String> {
    to_document("ListBucketResult", |w| {
        write_text(w, "Name", &doc.bucket)?;
        write_text(w, "Prefix", &doc.prefix)?;
        if !doc.delimiter.is_empty() {
            write_text(w, "Delimiter", &doc.delimiter)?;
        }
        write_text(w, "MaxKeys", &doc.max_keys.to_string())?;
        write_bool(w, "IsTruncated", doc.is_truncated)?;
        write_text(w, "KeyCount", &doc.key_count.to_string())?;
        write_opt_text(w, "ContinuationToken", doc.continuation_token.as_deref())?;
        write_opt_text(
            w,
            "NextContinuationToken",
            doc.next_continuation_token.as_deref(),
        )?;
        write_opt_text(w, "StartAfter", doc.start_after.as_deref())?;
        for entry in &doc.contents {
            w.create_element("Contents").write_inner_content(|w| {
                write_text(w, "Key", &entry.key)?;
                write_text(w, "LastModified", &format_timestamp(entry.last_modified))?;
                write_opt_text(w, "ETag", entry.etag.as_deref())?;
                write_text(w, "Size", &entry.size.to_string())?;
                write_text(w, "StorageClass", "STANDARD")
            })?;
        }
        for prefix in &doc.common_prefixes {
            w.create_element("CommonPrefixes")
                .write_inner_content(|w| write_text(w, "Prefix", prefix))?;
        }
        Ok(())
    })
}

// ---------------------------------------------------------------------------
// LifecycleConfiguration
// ---------------------------------------------------------------------------

/// Render a bucket's lifecycle policy for `GET /{bucket}?lifecycle`.
pub fn lifecycle_configuration(rules: &[LifecycleRuleRow]) -> io::Result<String> {
    to_document("LifecycleConfiguration", |w| {
        for rule in rules {
            w.create_element("Rule").write_inner_content(|w| {
                write_text(w, "Status", if rule.enabled { "Enabled" } else { "Disabled" })?;
                w.create_element("Filter")
                    .write_inner_content(|w| write_text(w, "Prefix", &rule.prefix))?;
                write_opt_days(w, "Expiration", "Days", rule.expire_current_after_days)?;
                if rule.expire_noncurrent_after_days.is_some()
                    || rule.noncurrent_newer_versions_to_keep.is_some()
                {
                    w.create_element("NoncurrentVersionExpiration")
                        .write_inner_content(|w| {
                            if let Some(days) = rule.expire_noncurrent_after_days {
                                write_text(w, "NoncurrentDays", &days.to_string())?;
                            }
                            if let Some(keep) = rule.noncurrent_newer_versions_to_keep {
                                write_text(w, "NewerNoncurrentVersions", &keep.to_string())?;
                            }
                            Ok(())
                        })?;
                }
                write_opt_days(
                    w,
                    "DeleteMarkerExpiration",
                    "Days",
                    rule.purge_delete_markers_after_days,
                )?;
                Ok(())
            })?;
        }
        Ok(())
    })
}

/// Parse a lifecycle policy PUT body into rule specs.
pub fn parse_lifecycle_configuration(body: &[u8]) -> Result<Vec<LifecycleRuleSpec>, String> {
    let text = std::str::from_utf8(body).map_err(|e| format!("invalid utf-8: {e}"))?;
    let mut reader = quick_xml::Reader::from_str(text);

    let mut rules = Vec::new();
    let mut current: Option<LifecycleRuleSpec> = None;
    let mut path: Vec<String> = Vec::new();

    loop {
        match reader.read_event().map_err(|e| e.to_string())? {
            Event::Start(e) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                if name == "Rule" {
                    current = Some(LifecycleRuleSpec::default());
                }
                path.push(name);
            }
            Event::End(e) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                if name == "Rule"
                    && let Some(rule) = current.take()
                {
                    rules.push(rule);
                }
                path.pop();
            }
            Event::Text(t) => {
                let value = t.unescape().map_err(|e| e.to_string())?;
                let value = value.trim();
                if value.is_empty() {
                    continue;
                }
                let Some(rule) = current.as_mut() else {
                    continue;
                };
                let tail: Vec<&str> = path.iter().map(String::as_str).collect();
                let days = || -> Result<i64, String> {
                    value
                        .parse::<i64>()
                        .map_err(|_| format!("invalid day count: {value:?}"))
                };
                match tail.as_slice() {
                    [.., "Rule", "Status"] => {
                        rule.enabled = value.eq_ignore_ascii_case("Enabled");
                    }
                    [.., "Rule", "Filter", "Prefix"] | [.., "Rule", "Prefix"] => {
                        rule.prefix = value.to_string();
                    }
                    [.., "Rule", "Expiration", "Days"] => {
                        rule.expire_current_after_days = Some(days()?);
                    }
                    [.., "Rule", "NoncurrentVersionExpiration", "NoncurrentDays"] => {
                        rule.expire_noncurrent_after_days = Some(days()?);
                    }
                    [.., "Rule", "NoncurrentVersionExpiration", "NewerNoncurrentVersions"] => {
                        rule.noncurrent_newer_versions_to_keep = Some(days()?);
                    }
                    [.., "Rule", "DeleteMarkerExpiration", "Days"] => {
                        rule.purge_delete_markers_after_days = Some(days()?);
                    }
                    _ => {}
                }
            }
            Event::Eof => {
                if current.is_some() || !path.is_empty() {
                    return Err("unterminated element".to_string());
                }
                break;
            }
            _ => {}
        }
    }

    Ok(rules)
}
