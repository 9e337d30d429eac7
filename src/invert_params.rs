use clap::ValueEnum;

/// What to do with a page whose MediaBox is present but has no area.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum DegenerateBoxPolicy {
    /// Abort the run with an error naming the page.
    #[default]
    Reject,
    /// Invert anyway; the emitted fills cover nothing.
    Proceed,
}

impl DegenerateBoxPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            DegenerateBoxPolicy::Reject => "reject",
            DegenerateBoxPolicy::Proceed => "proceed",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct InvertOptions {
    /// Compress every stream before saving
    pub compress: bool,
    /// Treat an unreadable content stream as fatal instead of dropping it
    pub strict: bool,
    pub degenerate: DegenerateBoxPolicy,
}
