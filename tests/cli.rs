use assert_cmd::prelude::*;
use predicates::prelude::*;
use predicates::str::contains;
use std::io::Write;
use std::process::Command;
use tempfile::NamedTempFile;

fn corrupt_texture() -> NamedTempFile {
    let mut tmp = tempfile::Builder::new()
        .suffix(".png")
        .tempfile()
        .expect("temp texture");
    tmp.write_all(b"\x89PNG\r\n\x1a\nthis is not really a png")
        .expect("write texture");
    tmp
}

#[test]
fn headless_run_prints_final_state() {
    let mut cmd = Command::cargo_bin("prism-render").expect("binary exists");
    cmd.arg("--headless").arg("--frames").arg("3");
    cmd.assert()
        .success()
        .stdout(contains("Rendered 3 frame(s) on the headless backend"))
        .stdout(contains(
            " - pyramid-0 pos=(0.00, -0.50, 0.00) rot=(180.00, 4.00, 0.00) scale=(0.45, 0.45, 0.45) texture=placeholder",
        ))
        .stdout(contains(" - pyramid-1 pos=(0.00, 0.50, 0.00)"))
        .stdout(contains(" - camera pos=(0.00, 0.00, 2.50)"));
}

#[test]
fn corrupt_texture_falls_back_to_placeholder() {
    let texture = corrupt_texture();
    let mut cmd = Command::cargo_bin("prism-render").expect("binary exists");
    cmd.arg("--headless")
        .arg("--frames")
        .arg("3")
        .arg("--texture")
        .arg(texture.path());
    cmd.assert()
        .success()
        .stdout(contains("Rendered 3 frame(s)"))
        .stdout(contains("texture=placeholder"))
        .stdout(contains("texture=1x1").not());
}

#[test]
fn broken_shader_override_is_fatal() {
    let mut shader = NamedTempFile::new().expect("temp shader");
    shader
        .write_all(b"@fragment fn fs_main( {")
        .expect("write shader");
    let mut cmd = Command::cargo_bin("prism-render").expect("binary exists");
    cmd.arg("--headless")
        .arg("--fragment-shader")
        .arg(shader.path());
    cmd.assert()
        .failure()
        .stderr(contains("failed to build the shader program"));
}

#[test]
fn unknown_key_bindings_are_rejected() {
    let mut cmd = Command::cargo_bin("prism-render").expect("binary exists");
    cmd.arg("--headless").arg("--forward").arg("NotAKey");
    cmd.assert().failure().stderr(contains("unknown key name"));
}
