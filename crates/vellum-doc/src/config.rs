use vellum_pages::DEFAULT_FAN_OUT;
use vellum_writer::WriteStyle;

/// Per-instance knobs, all with working defaults.
#[derive(Clone, Copy, Debug)]
pub struct DocumentConfig {
    /// Leaves per page-tree parent before a new parent opens.
    pub fan_out: usize,
    /// Members per object-stream container.
    pub max_container_members: usize,
    /// Ceiling on cross-reference slots; `None` accepts any growth.
    pub capacity_limit: Option<usize>,
    /// Index encoding and batching behavior on save.
    pub write_style: WriteStyle,
}

impl Default for DocumentConfig {
    fn default() -> Self {
        Self {
            fan_out: DEFAULT_FAN_OUT,
            max_container_members: vellum_container::DEFAULT_MAX_MEMBERS,
            capacity_limit: None,
            write_style: WriteStyle::default(),
        }
    }
}
