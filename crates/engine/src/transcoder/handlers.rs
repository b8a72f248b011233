use include_dir::{include_dir, Dir};
use rasbora_common::RasboraError;
use tera::Tera;

/// Built-in handler templates, embedded at compile time. Rust analogue of
/// the Go original's `//go:embed handlers/*` (`transcoder_ffmpeg_engine.go`).
static BUILTIN_HANDLERS: Dir<'_> =
    include_dir!("$CARGO_MANIFEST_DIR/assets/handlers");

/// Load every embedded `*.tera` file into a `Tera` instance, keyed by its
/// file stem (`h264.tera` -> `h264`), so `rasbora:h264` resolves directly.
pub fn load_builtin_templates() -> Result<Tera, RasboraError> {
    let mut tera = Tera::default();

    for file in BUILTIN_HANDLERS.files() {
        let name = file
            .path()
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| RasboraError::Template("malformed embedded handler name".into()))?;
        let contents = file
            .contents_utf8()
            .ok_or_else(|| RasboraError::Template(format!("handler {name} is not valid UTF-8")))?;
        tera.add_raw_template(name, contents)
            .map_err(|e| RasboraError::Template(e.to_string()))?;
    }

    Ok(tera)
}

/// Resolve `handler_ref` (`rasbora:<name>` or `custom:<path>`) into rendered
/// template source, gated by `allowed` (the configured handler allow-list).
/// Mirrors `_transcodingInputVideoFile`'s two-prefix lookup.
pub fn render(
    builtin: &Tera,
    allowed: &[String],
    handler_ref: &str,
    context: &tera::Context,
) -> Result<String, RasboraError> {
    if !allowed.iter().any(|h| h == handler_ref) {
        return Err(unknown_handler(handler_ref));
    }

    let rendered = if let Some(name) = handler_ref.strip_prefix("rasbora:") {
        builtin
            .render(name, context)
            .map_err(|e| RasboraError::Template(e.to_string()))?
    } else if let Some(path) = handler_ref.strip_prefix("custom:") {
        let source = std::fs::read_to_string(path)?;
        Tera::one_off(&source, context, true)
            .map_err(|e| RasboraError::Template(e.to_string()))?
    } else {
        return Err(unknown_handler(handler_ref));
    };

    Ok(collapse_whitespace(&rendered))
}

fn unknown_handler(handler_ref: &str) -> RasboraError {
    RasboraError::Template(format!("unknown rasbora ffmpeg handler: {handler_ref}"))
}

/// Collapse all whitespace (including the newlines handlers use for
/// readability) to single spaces, as `_transcodingInputVideoFile` does via
/// `strings.Join(strings.Fields(...), " ")`.
fn collapse_whitespace(rendered: &str) -> String {
    rendered.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_handlers_load_and_render() {
        let tera = load_builtin_templates().unwrap();
        let mut ctx = tera::Context::new();
        ctx.insert("ffmpeg", "ffmpeg");
        ctx.insert("input", "/work/t1_input.mp4");
        ctx.insert(
            "args",
            &serde_json::json!([{"quality": "720p", "output_file": "/work/t1_720p.mp4"}]),
        );
        ctx.insert("logfile", "/work/t1.log");
        ctx.insert("progressListener", "tcp:127.0.0.1:9999");

        let allowed = vec!["rasbora:h264".to_string()];
        let cmd = render(&tera, &allowed, "rasbora:h264", &ctx).unwrap();
        assert!(cmd.contains("libx264"));
        assert!(!cmd.contains('\n'));
    }

    #[test]
    fn handler_not_in_allow_list_is_rejected() {
        let tera = load_builtin_templates().unwrap();
        let ctx = tera::Context::new();
        let err = render(&tera, &[], "rasbora:h264", &ctx).unwrap_err();
        assert!(matches!(err, RasboraError::Template(_)));
    }
}
