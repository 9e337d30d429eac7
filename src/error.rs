use thiserror::Error;

use crate::model::PageBox;

#[derive(Error, Debug)]
pub enum InvertError {
    #[error("PDF error: {0}")]
    Pdf(#[from] lopdf::Error),

    #[error("page {page}: degenerate MediaBox {bbox}")]
    DegenerateMediaBox { page: u32, bbox: PageBox },

    #[error("page {page}: content stream {index} unreadable: {reason}")]
    UnreadableContent { page: u32, index: usize, reason: String },
}

pub type Result<T> = std::result::Result<T, InvertError>;
