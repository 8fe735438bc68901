/// Engine-wide behaviour switches.
/// ## Fields
/// - `auto_discover`:
///   If `true`, derivation extensions are consulted during registration for
///   required keys nothing registered satisfies yet.
///
///   Explicit producer-style derivations declared on a candidate apply
///   either way; turning this off only disables generic type-driven
///   discovery.
#[derive(Clone, Copy)]
pub struct Config {
    pub auto_discover: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self { auto_discover: true }
    }
}
