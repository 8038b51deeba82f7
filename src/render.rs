//! Rendering of per-alias artifacts from embedded Tera templates.
//!
//! The four templates live in `templates/` and are compiled into the binary,
//! so a deployed `pgbouncerctl` has no runtime template files to locate. All
//! artifacts render from the same instance context; optional TCP attributes
//! are only inserted into the context when set, which is what keeps the
//! corresponding ini keys absent (rather than empty) for unset attributes.

use std::fmt;

use tera::{Context, Tera};

use crate::config::ProxyInstance;

/// Embedded artifact templates.
#[derive(rust_embed::RustEmbed)]
#[folder = "templates/"]
struct Templates;

/// Template for the per-alias credentials file.
pub const USERLIST_TEMPLATE: &str = "userlist.txt.tera";
/// Template for the per-alias pgbouncer ini.
pub const INI_TEMPLATE: &str = "pgbouncer.ini.tera";
/// Template for the per-alias upstart job.
pub const UPSTART_TEMPLATE: &str = "upstart.conf.tera";
/// Template for the per-alias logrotate policy.
pub const LOGROTATE_TEMPLATE: &str = "logrotate.tera";

/// Error raised while loading or rendering templates.
#[derive(Debug)]
pub enum RenderError {
    /// An embedded template is missing or not valid UTF-8.
    Embedded(String),
    /// Tera failed to parse or render a template.
    Template(tera::Error),
}

impl fmt::Display for RenderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RenderError::Embedded(msg) => write!(f, "embedded template error: {}", msg),
            RenderError::Template(e) => write!(f, "template error: {}", e),
        }
    }
}

impl std::error::Error for RenderError {}

impl From<tera::Error> for RenderError {
    fn from(e: tera::Error) -> Self {
        RenderError::Template(e)
    }
}

/// Loaded template set for rendering instance artifacts.
pub struct Renderer {
    tera: Tera,
}

impl Renderer {
    /// Loads every embedded template into a fresh Tera instance.
    pub fn new() -> Result<Self, RenderError> {
        let mut tera = Tera::default();

        for file_path in Templates::iter() {
            let file = Templates::get(&file_path).ok_or_else(|| {
                RenderError::Embedded(format!("template not found: {}", file_path))
            })?;
            let content = std::str::from_utf8(file.data.as_ref()).map_err(|e| {
                RenderError::Embedded(format!("invalid UTF-8 in template {}: {}", file_path, e))
            })?;
            tera.add_raw_template(&file_path, content)?;
        }

        Ok(Self { tera })
    }

    /// Renders one named template for an instance.
    pub fn render(&self, template: &str, instance: &ProxyInstance) -> Result<String, RenderError> {
        let ctx = instance_context(instance);
        Ok(self.tera.render(template, &ctx)?)
    }
}

/// Builds the template context from an instance.
///
/// Optional TCP attributes are inserted only when present; the templates
/// guard on `is defined` so unset attributes leave no trace in the output.
fn instance_context(instance: &ProxyInstance) -> Context {
    let mut ctx = Context::new();

    ctx.insert("db_alias", &instance.db_alias);
    ctx.insert("user", &instance.user);
    ctx.insert("group", &instance.group);
    ctx.insert("db_host", &instance.db_host);
    ctx.insert("db_port", &instance.db_port);
    ctx.insert("db_name", &instance.db_name);
    ctx.insert("connect_query", &instance.connect_query);
    ctx.insert("listen_addr", &instance.listen_addr);
    ctx.insert("listen_port", &instance.listen_port);
    ctx.insert("log_dir", &instance.log_dir);
    ctx.insert("pid_dir", &instance.pid_dir);
    ctx.insert("socket_dir", &instance.socket_dir);
    ctx.insert("pool_mode", &instance.pool_mode.to_string());
    ctx.insert("max_client_conn", &instance.max_client_conn);
    ctx.insert("default_pool_size", &instance.default_pool_size);
    ctx.insert("min_pool_size", &instance.min_pool_size);
    ctx.insert("reserve_pool_size", &instance.reserve_pool_size);
    ctx.insert("reserve_pool_timeout", &instance.reserve_pool_timeout);
    ctx.insert("server_round_robin", &instance.server_round_robin);
    ctx.insert("server_idle_timeout", &instance.server_idle_timeout);
    ctx.insert("server_check_delay", &instance.server_check_delay);
    ctx.insert("server_reset_query", &instance.server_reset_query);
    ctx.insert("userlist", &instance.userlist);

    if let Some(v) = instance.tcp_keepalive {
        ctx.insert("tcp_keepalive", &v);
    }
    if let Some(v) = instance.tcp_keepidle {
        ctx.insert("tcp_keepidle", &v);
    }
    if let Some(v) = instance.tcp_keepintvl {
        ctx.insert("tcp_keepintvl", &v);
    }

    ctx
}
