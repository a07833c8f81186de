//! Install recipe rendering

use crate::errors::AgentError;

/// Values substituted into an install recipe
#[derive(Debug, Clone)]
pub struct TemplateParams {
    pub tmp_dir: String,
    pub version: String,
    pub os: String,
    pub arch: String,
    pub out_path: String,
}

impl TemplateParams {
    fn lookup(&self, name: &str) -> Option<&str> {
        match name {
            "TmpDir" => Some(&self.tmp_dir),
            "Version" => Some(&self.version),
            "Os" => Some(&self.os),
            "Arch" => Some(&self.arch),
            "OutPath" => Some(&self.out_path),
            _ => None,
        }
    }
}

/// Replace every `{{ .Name }}` placeholder in `template`.
///
/// Whitespace inside the braces is optional. Unknown names and unterminated
/// placeholders are configuration errors.
pub fn render(template: &str, params: &TemplateParams) -> Result<String, AgentError> {
    let mut rendered = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        rendered.push_str(&rest[..start]);
        let after_open = &rest[start + 2..];
        let end = after_open.find("}}").ok_or_else(|| {
            AgentError::ConfigError("unterminated placeholder in install script".to_string())
        })?;

        let expr = after_open[..end].trim();
        let name = expr.strip_prefix('.').ok_or_else(|| {
            AgentError::ConfigError(format!("unsupported template expression {{{{ {} }}}}", expr))
        })?;
        let value = params.lookup(name).ok_or_else(|| {
            AgentError::ConfigError(format!("unknown template parameter .{}", name))
        })?;
        rendered.push_str(value);

        rest = &after_open[end + 2..];
    }
    rendered.push_str(rest);

    Ok(rendered)
}

/// Host operating system as used in release artifact names
pub fn host_os() -> &'static str {
    match std::env::consts::OS {
        "macos" => "darwin",
        other => other,
    }
}

/// Host CPU architecture as used in release artifact names
pub fn host_arch() -> &'static str {
    match std::env::consts::ARCH {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        other => other,
    }
}
