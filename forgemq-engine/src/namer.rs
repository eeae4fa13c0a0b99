use uuid::Uuid;

/// Supplies names for links the application opens without naming them.
///
/// A connection can install its own namer, which is how tests get
/// deterministic link names.
pub trait LinkNamer: Send {
    fn link_name(&mut self) -> String;
}

/// Default namer, a fresh uuid per link.
#[derive(Default)]
pub struct UuidLinkNamer;

impl LinkNamer for UuidLinkNamer {
    fn link_name(&mut self) -> String {
        Uuid::new_v4().as_hyphenated().to_string()
    }
}
