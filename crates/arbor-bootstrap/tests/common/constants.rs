//! Test constants for arbor-bootstrap tests

#![allow(dead_code)]

/// Record root used by every test bed
pub const RECORD_ROOT: &str = "/arbor:configuration/arbor:initialize";

/// Content node created by `TestBed::with_content_root`
pub const CONTENT_ROOT: &str = "/content";

/// Descriptor file name written into extension directories
pub const DESCRIPTOR_NAME: &str = "arbor-extension.yaml";

/// Node type definitions used by type registration tests
pub const DEMO_TYPES: &str = r#"
<demo = 'http://example.org/demo/1.0'>

[demo:page] > nt:base orderable
  - demo:title (string)
  - demo:tags (string) multiple
  + * (nt:base) = nt:unstructured sns
"#;
