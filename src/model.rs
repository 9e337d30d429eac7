//! Typed stand-ins for the handful of PDF dictionaries the inversion touches.
//!
//! lopdf hands out untyped `Dictionary` values; these records pin down the
//! fields we actually write and convert back to lopdf objects at the edge.

use std::fmt;

use lopdf::{Dictionary, Document, Object, ObjectId, Stream};

/// Name under which each page's wrapped form is registered in `/XObject`.
pub const FORM_NAME: &str = "Fm0";
/// Name under which the shared Difference blend is registered in `/ExtGState`.
pub const INVERSION_STATE_NAME: &str = "GSINV";

/// A page bounding rectangle: lower-left and upper-right corners.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageBox {
    pub llx: f32,
    pub lly: f32,
    pub urx: f32,
    pub ury: f32,
}

impl PageBox {
    pub fn new(llx: f32, lly: f32, urx: f32, ury: f32) -> Self {
        Self { llx, lly, urx, ury }
    }

    /// Parse a `[llx lly urx ury]` array. Anything else is `None`.
    pub fn from_object(obj: &Object) -> Option<Self> {
        let arr = obj.as_array().ok()?;
        if arr.len() != 4 {
            return None;
        }
        let llx = as_f32(&arr[0])?;
        let lly = as_f32(&arr[1])?;
        let urx = as_f32(&arr[2])?;
        let ury = as_f32(&arr[3])?;
        Some(Self::new(llx, lly, urx, ury))
    }

    pub fn width(&self) -> f32 {
        self.urx - self.llx
    }

    pub fn height(&self) -> f32 {
        self.ury - self.lly
    }

    /// Zero or negative extent, or a coordinate that is not finite.
    pub fn is_degenerate(&self) -> bool {
        let finite = [self.llx, self.lly, self.urx, self.ury]
            .iter()
            .all(|v| v.is_finite());
        !finite || self.width() <= 0.0 || self.height() <= 0.0
    }

    pub fn to_object(&self) -> Object {
        Object::Array(vec![
            Object::Real(self.llx),
            Object::Real(self.lly),
            Object::Real(self.urx),
            Object::Real(self.ury),
        ])
    }
}

impl fmt::Display for PageBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{} {} {} {}]", self.llx, self.lly, self.urx, self.ury)
    }
}

fn as_f32(n: &Object) -> Option<f32> {
    match n {
        Object::Integer(i) => Some(*i as f32),
        Object::Real(r) => Some(*r),
        _ => None,
    }
}

/// Non-isolated, non-knockout transparency group in DeviceRGB.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TransparencyGroup;

impl TransparencyGroup {
    /// Overwrite the group keys on `dict`, leaving unrelated keys alone.
    pub fn apply_to(&self, dict: &mut Dictionary) {
        dict.set("S", "Transparency");
        dict.set("I", false);
        dict.set("K", false);
        dict.set("CS", "DeviceRGB");
    }

    pub fn to_dict(&self) -> Dictionary {
        let mut d = Dictionary::new();
        self.apply_to(&mut d);
        d
    }
}

/// A page's original drawing instructions repackaged as a Form XObject.
#[derive(Debug, Clone)]
pub struct FormXObject {
    pub bbox: PageBox,
    /// Indirect resource dictionary, shared with the page.
    pub resources: ObjectId,
    pub group: TransparencyGroup,
    pub content: Vec<u8>,
}

impl FormXObject {
    pub fn into_stream(self) -> Stream {
        let mut dict = Dictionary::new();
        dict.set("Type", "XObject");
        dict.set("Subtype", "Form");
        dict.set("FormType", 1);
        dict.set("BBox", self.bbox.to_object());
        dict.set("Resources", Object::Reference(self.resources));
        dict.set("Group", Object::Dictionary(self.group.to_dict()));
        Stream::new(dict, self.content)
    }
}

/// The one Difference-blend graphics state a document gets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InversionState {
    pub id: ObjectId,
}

impl InversionState {
    pub fn create(doc: &mut Document) -> Self {
        let mut d = Dictionary::new();
        d.set("Type", "ExtGState");
        d.set("BM", "Difference");
        let id = doc.add_object(Object::Dictionary(d));
        Self { id }
    }
}

/// Replacement page content: white under, form, difference-blended white over.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageContent {
    pub background: Vec<u8>,
    pub form_invocation: Vec<u8>,
    pub overlay: Vec<u8>,
}

impl PageContent {
    pub fn into_streams(self) -> [Stream; 3] {
        [
            Stream::new(Dictionary::new(), self.background),
            Stream::new(Dictionary::new(), self.form_invocation),
            Stream::new(Dictionary::new(), self.overlay),
        ]
    }
}
