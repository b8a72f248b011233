use rasbora_common::config::{FileSystemKind, SystemConfig};

use super::loader::ConfigError;

const VALID_ROLES: &[&str] = &[
    "task_intake",
    "video_transcoding",
    "callback_manager",
    "system_radar",
];

/// Validate the complete system configuration. The engine refuses to start
/// on validation failure (§6 "Exit codes": fatal init failures exit
/// non-zero; runtime task failures never crash the process).
pub fn validate(config: &SystemConfig) -> Result<(), ConfigError> {
    let mut errors: Vec<String> = Vec::new();

    validate_components(config, &mut errors);
    validate_filesystem(config, &mut errors);
    validate_heartbeat(config, &mut errors);

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::Validation(errors.join("; ")))
    }
}

fn validate_components(config: &SystemConfig, errors: &mut Vec<String>) {
    let active = &config.components.active;
    if active.is_empty() {
        errors.push("components.active must list at least one role".into());
    }
    for role in active {
        if !VALID_ROLES.contains(&role.as_str()) {
            errors.push(format!(
                "components.active: unknown role '{role}' (expected one of {VALID_ROLES:?})"
            ));
        }
    }

    if active.iter().any(|r| r == "video_transcoding") {
        let vt = &config.components.video_transcoding;
        if vt.unique_id.is_empty() {
            errors.push("components.video_transcoding.unique_id must not be empty".into());
        }
        if vt.queue.is_empty() {
            errors.push("components.video_transcoding.queue must not be empty".into());
        }
        if vt.check_new_task_interval == 0 {
            errors.push("components.video_transcoding.check_new_task_interval must be > 0".into());
        }
        if vt.engine.exe.is_empty() {
            errors.push("components.video_transcoding.engine.exe must not be empty".into());
        }
        if vt.engine.probe_exe.is_empty() {
            errors.push("components.video_transcoding.engine.probe_exe must not be empty".into());
        }
        if vt.engine.handlers.is_empty() {
            errors.push(
                "components.video_transcoding.engine.handlers allow-list must not be empty"
                    .into(),
            );
        }
        if vt.engine.progress_listener.is_empty() {
            errors
                .push("components.video_transcoding.engine.progress_listener must not be empty".into());
        }
    }

    if active.iter().any(|r| r == "callback_manager") {
        let cb = &config.components.callback_manager;
        if cb.unique_id.is_empty() {
            errors.push("components.callback_manager.unique_id must not be empty".into());
        }
        if cb.queue.is_empty() {
            errors.push("components.callback_manager.queue must not be empty".into());
        }
        if cb.check_new_task_interval == 0 {
            errors.push("components.callback_manager.check_new_task_interval must be > 0".into());
        }
        if cb.http.sending_timeout == 0 {
            errors.push("components.callback_manager.http.sending_timeout must be > 0".into());
        }
    }
}

fn validate_filesystem(config: &SystemConfig, errors: &mut Vec<String>) {
    match config.filesystem.primary {
        FileSystemKind::Local => {
            if config.filesystem.local.base_path.is_empty() {
                errors.push("filesystem.local.base_path must not be empty".into());
            }
        }
        FileSystemKind::Object => {
            let o = &config.filesystem.object;
            if o.endpoint.is_empty() || o.bucket.is_empty() {
                errors.push("filesystem.object.endpoint and bucket must not be empty".into());
            }
        }
    }
}

fn validate_heartbeat(config: &SystemConfig, errors: &mut Vec<String>) {
    if config.heartbeat.enabled && config.heartbeat.send_interval == 0 {
        errors.push("heartbeat.send_interval must be > 0 when heartbeat.enabled is true".into());
    }
}
