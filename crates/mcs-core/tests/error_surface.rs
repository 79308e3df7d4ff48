use mcs_core::errors::{ErrorInfo, McError};

fn sample_info(code: &str, message: &str) -> ErrorInfo {
    ErrorInfo::new(code, message)
        .with_context("rung", "1")
        .with_context("reason", "example")
}

#[test]
fn ladder_error_surface() {
    let err = McError::Ladder(sample_info("ladder-unsorted", "not ascending"));
    assert_eq!(err.info().code, "ladder-unsorted");
    assert!(err.info().context.contains_key("rung"));
}

#[test]
fn checkpoint_error_surface() {
    let err = McError::Checkpoint(
        sample_info("checkpoint-type-mismatch", "wrong configuration")
            .with_hint("load with the matching configuration type"),
    );
    assert_eq!(err.info().code, "checkpoint-type-mismatch");
    let text = err.to_string();
    assert!(text.starts_with("checkpoint error: wrong configuration"));
    assert!(text.contains("reason=example"));
    assert!(text.contains("hint: load with"));
}

#[test]
fn numeric_error_surface() {
    let err = McError::Numeric(sample_info("berg-lambda", "not finite"));
    assert_eq!(err.info().code, "berg-lambda");
}

#[test]
fn io_errors_carry_the_path() {
    let missing = std::path::Path::new("/definitely/not/here");
    let err = McError::io(
        "config-read",
        std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        missing,
    );
    assert!(matches!(err, McError::Io(_)));
    assert_eq!(err.info().context["path"], "/definitely/not/here");
}

#[test]
fn errors_serialize_with_family_tag() {
    let err = McError::Config(sample_info("process-number", "must be positive"));
    let json = serde_json::to_value(&err).unwrap();
    assert_eq!(json["family"], "Config");
    assert_eq!(json["family"], err.family());
    assert_eq!(json["detail"]["code"], "process-number");

    let back: McError = serde_json::from_value(json).unwrap();
    assert_eq!(back, err);
}
