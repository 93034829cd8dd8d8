// Secrets vault + masking layer.
// The vault is a separate 0600 SQLite file; masking is applied to every
// outbound payload as a whole-structure pass, after assembly.

mod mask;
mod parser;
mod sanitize;
mod vault;

pub use mask::{MASK_PLACEHOLDER, build_pattern, mask_text, mask_value};
pub use parser::{parse_file_secrets, parse_text_secrets, store_declarations};
pub use sanitize::sanitize_batch;
pub use vault::{SecretKind, SecretRecord, SecretsVault};
