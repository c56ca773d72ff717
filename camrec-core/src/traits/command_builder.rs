use std::path::Path;

use crate::models::session::StartOptions;

/// Builds the encoder argument vector for one segment.
///
/// Implemented by the configuration layer; the supervisor only consumes the
/// resulting argv. Must be pure: the same inputs yield the same argv.
pub trait CommandBuilder: Send + Sync {
    fn build_command(&self, source_id: &str, output_path: &Path, options: &StartOptions) -> Vec<String>;
}

/// Template-driven builder.
///
/// Each template argument may contain `{source}`, `{input}` and `{output}`
/// placeholders. Encoder settings are not interpolated; builders that need
/// them implement `CommandBuilder` directly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArgvTemplate {
    args: Vec<String>,
}

impl ArgvTemplate {
    pub fn new<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            args: args.into_iter().map(Into::into).collect(),
        }
    }
}

impl CommandBuilder for ArgvTemplate {
    fn build_command(&self, source_id: &str, output_path: &Path, options: &StartOptions) -> Vec<String> {
        let output = output_path.to_string_lossy();
        self.args
            .iter()
            .map(|arg| {
                arg.replace("{source}", source_id)
                    .replace("{input}", &options.input)
                    .replace("{output}", &output)
            })
            .collect()
    }
}
