#![allow(clippy::expect_used, clippy::unwrap_used)]

#[path = "../src/types/mod.rs"]
#[allow(dead_code)]
mod types;

#[test]
fn export_bindings() {
    let dir = tempfile::tempdir().expect("create temp dir");
    let out_path = dir.path().join("bindings.ts");
    let ts_cfg =
        specta::ts::ExportConfiguration::default().bigint(specta::ts::BigIntExportBehavior::Number);

    specta::export::ts_with_cfg(out_path.to_str().expect("utf-8 path"), &ts_cfg)
        .expect("failed to export Specta bindings");

    let bindings = std::fs::read_to_string(&out_path).expect("read bindings");
    for name in ["WebhookDelivery", "ReactResponse", "EmailPushAck", "ApiErrorResponse"] {
        assert!(bindings.contains(name), "missing {name} in bindings");
    }
}
