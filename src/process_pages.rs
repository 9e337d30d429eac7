use std::collections::{BTreeMap, BTreeSet};

use log::{debug, info, warn};
use lopdf::{Dictionary, Document, Object, ObjectId, Stream};

use crate::content::inverted_page_content;
use crate::error::{InvertError, Result};
use crate::invert_params::{DegenerateBoxPolicy, InvertOptions};
use crate::model::{
    FormXObject, InversionState, PageBox, TransparencyGroup, FORM_NAME, INVERSION_STATE_NAME,
};

// ========== small helpers ==========
#[inline]
fn dict_get<'a>(dict: &'a Dictionary, key: &[u8]) -> Option<&'a Object> {
    dict.get(key).ok()
}

#[inline]
fn obj_as_dict_owned(obj: &Object, doc: &Document) -> Option<Dictionary> {
    match obj {
        Object::Dictionary(d) => Some(d.clone()),
        Object::Reference(idref) => {
            let d = doc.get_object(*idref).ok()?.as_dict().ok()?;
            Some(d.clone())
        }
        _ => None,
    }
}

fn kind_of(obj: &Object) -> &'static str {
    match obj {
        Object::Null => "null",
        Object::Boolean(_) => "boolean",
        Object::Integer(_) => "integer",
        Object::Real(_) => "real",
        Object::Name(_) => "name",
        Object::String(..) => "string",
        Object::Array(_) => "array",
        Object::Dictionary(_) => "dictionary",
        Object::Stream(_) => "stream",
        Object::Reference(_) => "reference",
    }
}

fn resolve<'a>(doc: &'a Document, obj: &'a Object) -> Option<&'a Object> {
    match obj {
        Object::Reference(id) => doc.get_object(*id).ok(),
        other => Some(other),
    }
}

/// Look `key` up on the page, then along its `/Parent` chain.
fn inherited_attribute<'a>(doc: &'a Document, page_id: ObjectId, key: &[u8]) -> Option<&'a Object> {
    let mut seen = BTreeSet::new();
    let mut cur_id = page_id;
    loop {
        if !seen.insert(cur_id) {
            warn!("cycle in page tree at {:?}", cur_id);
            return None;
        }
        let cur = doc.get_object(cur_id).ok()?.as_dict().ok()?;
        if let Some(obj) = dict_get(cur, key) {
            return Some(obj);
        }
        match dict_get(cur, b"Parent") {
            Some(Object::Reference(pid)) => cur_id = *pid,
            _ => return None,
        }
    }
}

fn effective_mediabox(doc: &Document, page_id: ObjectId) -> Option<PageBox> {
    let obj = inherited_attribute(doc, page_id, b"MediaBox")?;
    PageBox::from_object(resolve(doc, obj)?)
}

// ========== content reading ==========

/// A content stream that could not be read and contributed no bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentReadWarning {
    pub page: u32,
    /// Position of the stream within the page's `/Contents`.
    pub index: usize,
    pub reason: String,
}

fn decode_content_stream(stream: &Stream) -> std::result::Result<Vec<u8>, String> {
    if stream.dict.get(b"Filter").is_ok() {
        stream
            .decompressed_content()
            .map_err(|e| format!("failed to decompress content stream: {e}"))
    } else {
        Ok(stream.content.clone())
    }
}

fn read_content_item(doc: &Document, item: &Object) -> std::result::Result<Vec<u8>, String> {
    match item {
        Object::Reference(id) => {
            let obj = doc
                .get_object(*id)
                .map_err(|e| format!("cannot resolve {} {} R: {e}", id.0, id.1))?;
            let stream = obj
                .as_stream()
                .map_err(|e| format!("{} {} R is not a stream: {e}", id.0, id.1))?;
            decode_content_stream(stream)
        }
        Object::Stream(s) => decode_content_stream(s),
        other => Err(format!("unexpected {} in /Contents", kind_of(other))),
    }
}

/// Read every constituent of the page's `/Contents`, one result per stream.
pub fn read_content_streams(
    doc: &Document,
    page_id: ObjectId,
) -> Result<Vec<std::result::Result<Vec<u8>, String>>> {
    let page = doc.get_object(page_id)?.as_dict()?;
    let Some(contents) = dict_get(page, b"Contents") else {
        return Ok(Vec::new());
    };

    // an indirect array of streams is legal too
    let items: Vec<&Object> = match contents {
        Object::Array(arr) => arr.iter().collect(),
        Object::Reference(id) => match doc.get_object(*id) {
            Ok(Object::Array(arr)) => arr.iter().collect(),
            _ => vec![contents],
        },
        other => vec![other],
    };

    Ok(items.into_iter().map(|item| read_content_item(doc, item)).collect())
}

/// Concatenate the readable streams with `\n`; unreadable ones become warnings.
fn collect_page_content(
    doc: &Document,
    page_no: u32,
    page_id: ObjectId,
) -> Result<(Vec<u8>, Vec<ContentReadWarning>)> {
    let mut parts = Vec::new();
    let mut warnings = Vec::new();
    for (index, read) in read_content_streams(doc, page_id)?.into_iter().enumerate() {
        match read {
            Ok(bytes) => parts.push(bytes),
            Err(reason) => warnings.push(ContentReadWarning {
                page: page_no,
                index,
                reason,
            }),
        }
    }
    Ok((parts.join(&b'\n'), warnings))
}

// ========== resources ==========

/// Indirect resource dictionaries that more than one page points at directly.
pub fn shared_resource_ids(doc: &Document, pages: &BTreeMap<u32, ObjectId>) -> BTreeSet<ObjectId> {
    let mut counts: BTreeMap<ObjectId, usize> = BTreeMap::new();
    for pid in pages.values() {
        let Ok(page) = doc.get_object(*pid).and_then(Object::as_dict) else {
            continue;
        };
        if let Some(Object::Reference(rid)) = dict_get(page, b"Resources") {
            *counts.entry(*rid).or_default() += 1;
        }
    }
    counts
        .into_iter()
        .filter(|(_, n)| *n > 1)
        .map(|(id, _)| id)
        .collect()
}

/// Give the page an indirect resource dictionary of its own and return its id.
///
/// An unshared indirect dictionary is reused as is. Inline, inherited and
/// shared dictionaries are copied into a fresh object, so that writing `/Fm0`
/// into it never reaches another page.
fn own_page_resources(
    doc: &mut Document,
    page_id: ObjectId,
    shared: &BTreeSet<ObjectId>,
) -> Result<ObjectId> {
    let current = doc.get_object(page_id)?.as_dict()?.get(b"Resources").ok().cloned();

    let resources = match current {
        Some(Object::Reference(rid))
            if !shared.contains(&rid) && doc.get_object(rid).and_then(Object::as_dict).is_ok() =>
        {
            return Ok(rid);
        }
        Some(Object::Reference(rid)) => match doc.get_object(rid).and_then(Object::as_dict) {
            Ok(d) => {
                debug!("copying shared resources {:?} for page {:?}", rid, page_id);
                d.clone()
            }
            Err(e) => {
                warn!("page {:?}: /Resources {:?} is not a dictionary ({e}), starting empty", page_id, rid);
                Dictionary::new()
            }
        },
        Some(Object::Dictionary(d)) => d,
        Some(other) => {
            warn!(
                "page {:?}: /Resources is {}, starting empty",
                page_id,
                kind_of(&other)
            );
            Dictionary::new()
        }
        None => inherited_attribute(doc, page_id, b"Resources")
            .and_then(|o| obj_as_dict_owned(o, doc))
            .unwrap_or_else(Dictionary::new),
    };

    let rid = doc.add_object(Object::Dictionary(resources));
    doc.get_object_mut(page_id)?
        .as_dict_mut()?
        .set("Resources", Object::Reference(rid));
    Ok(rid)
}

/// Set `/<table>/<name>` in the resource dictionary, creating the table if needed.
fn register_resource(
    doc: &mut Document,
    resources_id: ObjectId,
    table: &str,
    name: &str,
    target: ObjectId,
) -> Result<()> {
    let mut entries = {
        let res = doc.get_object(resources_id)?.as_dict()?;
        dict_get(res, table.as_bytes())
            .and_then(|o| obj_as_dict_owned(o, doc))
            .unwrap_or_else(Dictionary::new)
    };
    if entries.has(name.as_bytes()) {
        debug!("overwriting /{table}/{name} in {:?}", resources_id);
    }
    entries.set(name, Object::Reference(target));

    doc.get_object_mut(resources_id)?
        .as_dict_mut()?
        .set(table, Object::Dictionary(entries));
    Ok(())
}

// ========== wrapping ==========

#[derive(Debug, Clone)]
pub struct WrappedPage {
    pub width: f32,
    pub height: f32,
    pub form_id: ObjectId,
    pub resources_id: ObjectId,
    pub warnings: Vec<ContentReadWarning>,
}

/// Move the page's drawing instructions into a Form XObject registered as
/// `/Fm0` in the page's resources.
///
/// Returns `Ok(None)` without touching the page when it has no usable
/// MediaBox. The page's `/Contents` is left for the caller to replace.
pub fn wrap_page_into_form(
    doc: &mut Document,
    page_no: u32,
    page_id: ObjectId,
    shared: &BTreeSet<ObjectId>,
    options: &InvertOptions,
) -> Result<Option<WrappedPage>> {
    let Some(bbox) = effective_mediabox(doc, page_id) else {
        return Ok(None);
    };
    if bbox.is_degenerate() {
        match options.degenerate {
            DegenerateBoxPolicy::Reject => {
                return Err(InvertError::DegenerateMediaBox { page: page_no, bbox });
            }
            DegenerateBoxPolicy::Proceed => {
                warn!("page {page_no}: degenerate MediaBox {bbox}, inverting anyway");
            }
        }
    }

    let (content, warnings) = collect_page_content(doc, page_no, page_id)?;
    if let (true, Some(w)) = (options.strict, warnings.first()) {
        return Err(InvertError::UnreadableContent {
            page: w.page,
            index: w.index,
            reason: w.reason.clone(),
        });
    }
    for w in &warnings {
        warn!(
            "page {}: dropping content stream {}: {}",
            w.page, w.index, w.reason
        );
    }
    wrap_with(doc, page_id, bbox, content, shared, warnings).map(Some)
}

fn wrap_with(
    doc: &mut Document,
    page_id: ObjectId,
    bbox: PageBox,
    content: Vec<u8>,
    shared: &BTreeSet<ObjectId>,
    warnings: Vec<ContentReadWarning>,
) -> Result<WrappedPage> {
    let resources_id = own_page_resources(doc, page_id, shared)?;
    let form = FormXObject {
        bbox,
        resources: resources_id,
        group: TransparencyGroup,
        content,
    };
    let form_id = doc.add_object(Object::Stream(form.into_stream()));
    // replaces any earlier /Fm0, including one left by a previous inversion
    register_resource(doc, resources_id, "XObject", FORM_NAME, form_id)?;

    Ok(WrappedPage {
        width: bbox.width(),
        height: bbox.height(),
        form_id,
        resources_id,
        warnings,
    })
}

// ========== public entry ==========

#[derive(Debug, Clone, Default)]
pub struct InvertReport {
    /// Page numbers (1-based) that received the inverted content.
    pub inverted: Vec<u32>,
    /// Page numbers left untouched for lack of a MediaBox.
    pub skipped: Vec<u32>,
    pub warnings: Vec<ContentReadWarning>,
    /// The `/GSINV` graphics state every inverted page points at.
    pub inversion_state: ObjectId,
}

fn invert_page(
    doc: &mut Document,
    wrapped: &WrappedPage,
    page_id: ObjectId,
    gs: InversionState,
) -> Result<()> {
    {
        let page = doc.get_object(page_id)?.as_dict()?;
        let mut group = dict_get(page, b"Group")
            .and_then(|o| obj_as_dict_owned(o, doc))
            .unwrap_or_else(Dictionary::new);
        TransparencyGroup.apply_to(&mut group);
        doc.get_object_mut(page_id)?
            .as_dict_mut()?
            .set("Group", Object::Dictionary(group));
    }

    register_resource(doc, wrapped.resources_id, "ExtGState", INVERSION_STATE_NAME, gs.id)?;

    let contents: Vec<Object> = inverted_page_content(wrapped.width, wrapped.height)
        .into_streams()
        .into_iter()
        .map(|s| Object::Reference(doc.add_object(Object::Stream(s))))
        .collect();

    doc.get_object_mut(page_id)?
        .as_dict_mut()?
        .set("Contents", Object::Array(contents));
    Ok(())
}

/// Invert every page of `doc` in place.
pub fn invert_document(doc: &mut Document, options: &InvertOptions) -> Result<InvertReport> {
    let pages = doc.get_pages();
    let shared = shared_resource_ids(doc, &pages);
    let gs = InversionState::create(doc);
    debug!("inversion graphics state at {:?}", gs.id);

    let mut report = InvertReport {
        inversion_state: gs.id,
        ..Default::default()
    };

    for (page_no, page_id) in pages {
        let Some(wrapped) = wrap_page_into_form(doc, page_no, page_id, &shared, options)? else {
            info!("page {page_no}: no MediaBox, left unchanged");
            report.skipped.push(page_no);
            continue;
        };
        invert_page(doc, &wrapped, page_id, gs)?;
        debug!(
            "page {page_no}: {}x{} wrapped into {:?}",
            wrapped.width, wrapped.height, wrapped.form_id
        );
        report.inverted.push(page_no);
        report.warnings.extend(wrapped.warnings);
    }

    Ok(report)
}
