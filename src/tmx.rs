//! TMX-shaped exchange of TM entries.
//!
//! The reader is deliberately tolerant: a broken `<tu>` is skipped and
//! counted instead of poisoning the whole import, because tool-exported and
//! hand-edited TMX files disagree about details constantly. Inline tags
//! travel as `<ph type="kind">payload</ph>` inside `<seg>`; any other
//! inline element is captured the same way with its element name as the
//! kind, payload bytes untouched.

use std::io::{BufRead, Write};

use chrono::{DateTime, NaiveDateTime, Utc};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};

use crate::segment::{Run, SegText, Tag};
use crate::tm::{LanguagePair, TmEntry, TmEntryCreate, TmError, TmStore};

const TMX_DATE: &str = "%Y%m%dT%H%M%SZ";

#[derive(Debug, thiserror::Error)]
pub enum TmxError {
    #[error("xml error: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("tm error: {0}")]
    Tm(#[from] TmError),
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ImportReport {
    pub imported: usize,
    pub skipped: usize,
}

/// Write entries as a TMX 1.4 document.
pub fn export_tmx(
    entries: &[TmEntry],
    srclang: &str,
    out: &mut dyn Write,
) -> Result<(), TmxError> {
    let mut writer = Writer::new(out);
    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;

    let mut tmx = BytesStart::new("tmx");
    tmx.push_attribute(("version", "1.4"));
    writer.write_event(Event::Start(tmx))?;

    let mut header = BytesStart::new("header");
    header.push_attribute(("creationtool", "tmatch"));
    header.push_attribute(("creationtoolversion", env!("CARGO_PKG_VERSION")));
    header.push_attribute(("segtype", "sentence"));
    header.push_attribute(("o-tmf", "tmatch"));
    header.push_attribute(("adminlang", "en"));
    header.push_attribute(("srclang", srclang));
    header.push_attribute(("datatype", "plaintext"));
    writer.write_event(Event::Empty(header))?;

    writer.write_event(Event::Start(BytesStart::new("body")))?;
    for entry in entries {
        let mut tu = BytesStart::new("tu");
        let date = entry.created_at.format(TMX_DATE).to_string();
        tu.push_attribute(("creationdate", date.as_str()));
        if !entry.provenance.is_empty() {
            tu.push_attribute(("creationid", entry.provenance.as_str()));
        }
        writer.write_event(Event::Start(tu))?;
        write_tuv(&mut writer, &entry.pair.source_lang, &entry.source)?;
        write_tuv(&mut writer, &entry.pair.target_lang, &entry.target)?;
        writer.write_event(Event::End(BytesEnd::new("tu")))?;
    }
    writer.write_event(Event::End(BytesEnd::new("body")))?;
    writer.write_event(Event::End(BytesEnd::new("tmx")))?;
    Ok(())
}

fn write_tuv<W: Write>(
    writer: &mut Writer<W>,
    lang: &str,
    text: &SegText,
) -> Result<(), TmxError> {
    let mut tuv = BytesStart::new("tuv");
    tuv.push_attribute(("xml:lang", lang));
    writer.write_event(Event::Start(tuv))?;
    writer.write_event(Event::Start(BytesStart::new("seg")))?;
    for run in &text.runs {
        match run {
            Run::Text(text) => writer.write_event(Event::Text(BytesText::new(text)))?,
            Run::Tag(tag) => {
                let mut ph = BytesStart::new("ph");
                ph.push_attribute(("type", tag.kind.as_str()));
                writer.write_event(Event::Start(ph))?;
                writer.write_event(Event::Text(BytesText::new(&tag.payload)))?;
                writer.write_event(Event::End(BytesEnd::new("ph")))?;
            }
        }
    }
    writer.write_event(Event::End(BytesEnd::new("seg")))?;
    writer.write_event(Event::End(BytesEnd::new("tuv")))?;
    Ok(())
}

/// Import every usable unit of a TMX document into the store.
///
/// Units lacking a variant for the requested pair, with an empty source or
/// target, or colliding with an existing entry under the reject policy are
/// counted as skipped. XML that cannot be parsed at all aborts the import.
pub fn import_tmx<R: BufRead>(
    store: &dyn TmStore,
    pair: &LanguagePair,
    input: R,
) -> Result<ImportReport, TmxError> {
    let mut reader = Reader::from_reader(input);
    reader.config_mut().trim_text(false);

    let mut report = ImportReport::default();
    let mut tu: Option<RawUnit> = None;
    let mut cur_lang: Option<String> = None;
    let mut seg: Option<SegText> = None;
    let mut inline: Option<InlineCapture> = None;

    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_event_into(&mut buf)? {
            Event::Eof => break,
            Event::Start(e) => {
                if seg.is_some() {
                    match &mut inline {
                        Some(capture) => capture.depth += 1,
                        None => inline = Some(InlineCapture::open(&e)),
                    }
                } else {
                    match e.name().as_ref() {
                        b"tu" => {
                            tu = Some(RawUnit {
                                created_at: attr(&e, b"creationdate")
                                    .and_then(|raw| parse_creation_date(&raw)),
                                provenance: attr(&e, b"creationid").unwrap_or_default(),
                                variants: Vec::new(),
                            });
                        }
                        b"tuv" if tu.is_some() => {
                            cur_lang = attr(&e, b"xml:lang").or_else(|| attr(&e, b"lang"));
                        }
                        b"seg" if cur_lang.is_some() => seg = Some(SegText::default()),
                        _ => {}
                    }
                }
            }
            Event::Empty(e) => {
                if let Some(text) = &mut seg {
                    if inline.is_none() {
                        let capture = InlineCapture::open(&e);
                        text.push_tag(Tag::new(capture.kind, capture.payload));
                    }
                }
            }
            Event::End(e) => {
                if inline.is_some() {
                    let finished = match &mut inline {
                        Some(capture) => {
                            capture.depth -= 1;
                            capture.depth == 0
                        }
                        None => false,
                    };
                    if finished {
                        if let (Some(capture), Some(text)) = (inline.take(), &mut seg) {
                            text.push_tag(Tag::new(capture.kind, capture.payload));
                        }
                    }
                } else {
                    match e.name().as_ref() {
                        b"seg" => {
                            if let (Some(text), Some(lang), Some(unit)) =
                                (seg.take(), &cur_lang, &mut tu)
                            {
                                unit.variants.push((lang.clone(), text));
                            }
                        }
                        b"tuv" => cur_lang = None,
                        b"tu" => {
                            if let Some(unit) = tu.take() {
                                apply_unit(store, pair, unit, &mut report)?;
                            }
                        }
                        _ => {}
                    }
                }
            }
            Event::Text(t) => {
                let text = t.unescape().map_err(quick_xml::Error::from)?.into_owned();
                if let Some(capture) = &mut inline {
                    capture.payload.push_str(&text);
                } else if let Some(seg_text) = &mut seg {
                    seg_text.push_text(text);
                }
            }
            Event::CData(t) => {
                let text = String::from_utf8_lossy(&t.into_inner()).into_owned();
                if let Some(capture) = &mut inline {
                    capture.payload.push_str(&text);
                } else if let Some(seg_text) = &mut seg {
                    seg_text.push_text(text);
                }
            }
            _ => {}
        }
    }

    Ok(report)
}

struct RawUnit {
    created_at: Option<DateTime<Utc>>,
    provenance: String,
    variants: Vec<(String, SegText)>,
}

/// An inline element inside `<seg>` being flattened into one opaque tag.
struct InlineCapture {
    kind: String,
    payload: String,
    depth: usize,
}

impl InlineCapture {
    fn open(e: &BytesStart) -> Self {
        let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
        InlineCapture {
            kind: attr(e, b"type").unwrap_or(name),
            payload: String::new(),
            depth: 1,
        }
    }
}

fn apply_unit(
    store: &dyn TmStore,
    pair: &LanguagePair,
    unit: RawUnit,
    report: &mut ImportReport,
) -> Result<(), TmxError> {
    let Some(create) = build_create(pair, unit) else {
        report.skipped += 1;
        return Ok(());
    };

    match store.insert(create) {
        Ok(_) => report.imported += 1,
        Err(TmError::DuplicateKey { existing_id }) => {
            log::warn!("skipping unit duplicating entry {existing_id}");
            report.skipped += 1;
        }
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

fn build_create(pair: &LanguagePair, unit: RawUnit) -> Option<TmEntryCreate> {
    let mut source: Option<(String, SegText)> = None;
    let mut target: Option<(String, SegText)> = None;
    for (lang, text) in unit.variants {
        if source.is_none() && lang_matches(&pair.source_lang, &lang) {
            source = Some((lang, text));
        } else if target.is_none() && lang_matches(&pair.target_lang, &lang) {
            target = Some((lang, text));
        }
    }
    let (source_lang, source) = source.or_else(|| {
        log::debug!("skipping unit without a source variant");
        None
    })?;
    let (target_lang, target) = target.or_else(|| {
        log::debug!("skipping unit without a target variant");
        None
    })?;

    if is_blank(&source) {
        log::debug!("skipping unit with an empty source");
        return None;
    }
    if is_blank(&target) {
        log::debug!("skipping unit with an empty target");
        return None;
    }

    Some(TmEntryCreate {
        pair: LanguagePair::new(source_lang, target_lang),
        source,
        target,
        provenance: unit.provenance,
        created_at: unit.created_at,
    })
}

fn is_blank(text: &SegText) -> bool {
    text.normalized_text().is_empty() && text.tag_payloads().is_empty()
}

/// "en" matches "en-US", and "en-US" a bare "en", but "en-US" never
/// matches "en-GB".
fn lang_matches(want: &str, got: &str) -> bool {
    if want.eq_ignore_ascii_case(got) {
        return true;
    }
    fn primary(code: &str) -> &str {
        code.split(['-', '_']).next().unwrap_or(code)
    }
    let want_primary = primary(want);
    let got_primary = primary(got);
    want_primary.eq_ignore_ascii_case(got_primary)
        && (want.len() == want_primary.len() || got.len() == got_primary.len())
}

fn attr(e: &BytesStart, name: &[u8]) -> Option<String> {
    e.attributes().flatten().find(|a| a.key.as_ref() == name).map(|a| {
        a.unescape_value()
            .map(|value| value.into_owned())
            .unwrap_or_else(|_| String::from_utf8_lossy(&a.value).into_owned())
    })
}

fn parse_creation_date(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, TMX_DATE) {
        return Some(naive.and_utc());
    }
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|date| date.with_timezone(&Utc))
}
