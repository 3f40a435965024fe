//! Integration tests for the mail-forge pipeline.
//!
//! These tests validate:
//! - The sample tree compiles through every stage
//! - Template syntax comes back unchanged after normalization and inlining
//! - Discovery picks compile targets only
//! - Batch compiles keep going past failing templates
//! - Resolution errors surface from `compile_one`

use std::fs;
use std::path::{Path, PathBuf};

use mail_forge::{templates, CompileConfig, CompileError, Compiler};

// =====================================================================
// Helpers
// =====================================================================

struct Project {
    _dir: tempfile::TempDir,
    src: PathBuf,
    dist: PathBuf,
}

impl Project {
    fn sample() -> Self {
        let project = Self::empty();
        templates::write_sample_tree(&project.src).unwrap();
        project
    }

    fn empty() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        let dist = dir.path().join("dist");
        fs::create_dir_all(&src).unwrap();
        Self {
            _dir: dir,
            src,
            dist,
        }
    }

    fn add(&self, name: &str, body: &str) -> &Self {
        let path = self.src.join(name);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, body).unwrap();
        self
    }

    fn config(&self) -> CompileConfig {
        CompileConfig::new(&self.src, &self.dist).with_stylesheet(self.src.join("email.css"))
    }

    fn compiler(&self) -> Compiler {
        Compiler::new(self.config())
    }
}

fn read(path: &Path) -> String {
    fs::read_to_string(path).unwrap_or_else(|e| panic!("reading {}: {e}", path.display()))
}

// =====================================================================
// Sample tree
// =====================================================================

#[test]
fn welcome_email_compiles_to_table_markup() {
    let project = Project::sample();
    let out = project.compiler().compile_one("emails/welcome", false).unwrap();
    assert_eq!(out.template_name, "emails/welcome");

    let html = &out.html;
    for tag in ["container", "row", "columns", "button"] {
        assert!(!html.contains(&format!("<{tag}")), "<{tag}> left in output");
    }
    assert!(html.contains("<table"));
    assert!(html.contains("class=\"content\""));
    assert!(html.contains("<tr"));
    assert!(html.contains("<td"));
    assert!(html.contains("href=\"{{ confirm_url }}\""));
}

#[test]
fn welcome_email_keeps_template_syntax() {
    let project = Project::sample();
    let html = project.compiler().compile_one("emails/welcome", false).unwrap().html;

    assert!(html.contains("{{ user.name | title }}"));
    assert!(html.contains("{% for item in checklist %}"));
    assert!(html.contains("{{ loop.index }}. {{ item }}"));
    assert!(html.contains("{% endfor %}"));
    assert!(!html.contains('\u{E000}'), "placeholder left in output");
}

#[test]
fn layouts_and_partials_are_resolved() {
    let project = Project::sample();
    let html = project.compiler().compile_one("emails/welcome", false).unwrap().html;

    assert!(!html.contains("{% extends"));
    assert!(!html.contains("{% include"));
    assert!(html.contains("<title>Welcome, {{ user.name }}</title>"));
    // Header partial from the base layout, footer from the branded layout.
    assert!(html.contains("class=\"header\""));
    assert!(html.contains("1 Main St"));
    assert!(html.starts_with("<!DOCTYPE html>"));
}

#[test]
fn stylesheet_rules_are_inlined() {
    let project = Project::sample();
    let html = project.compiler().compile_one("emails/welcome", false).unwrap().html;

    assert!(html.contains("<p class=\"lead\" style=\"margin: 0 0 12px; font-size: 18px;\">"));
    // Embedded <style> blocks stay in the head.
    assert!(html.contains("@media (max-width: 600px)"));
    assert!(!html.contains("font-family: Brand"));
}

#[test]
fn reset_email_keeps_conditionals() {
    let project = Project::sample();
    let html = project.compiler().compile_one("emails/reset", false).unwrap().html;

    assert!(html.contains("<b>{{ code }}</b>"));
    assert!(html.contains("{% if expires %}"));
    assert!(html.contains("Expires {{ expires }}"));
    assert!(html.contains("{% endif %}"));
    // Base footer default survives when no layout overrides it.
    assert!(html.contains("Sent by {{ site_name }}"));
}

#[test]
fn compiled_output_is_written_to_dist() {
    let project = Project::sample();
    let out = project.compiler().compile_one("emails/reset", true).unwrap();
    let written = read(&project.dist.join("emails/reset.njk"));
    assert_eq!(written, out.html);
}

// =====================================================================
// Discovery and batch compiles
// =====================================================================

#[test]
fn discovery_skips_partials_and_layouts() {
    let project = Project::sample();
    project
        .add("_header.njk", "{% extends \"layouts/base.njk\" %}")
        .add("layout-base.njk", "{% extends \"layouts/base.njk\" %}")
        .add("partials/footer.njk", "{% extends \"layouts/base.njk\" %}")
        .add("standalone.njk", "<p>no layout</p>")
        .add("notes.txt", "{% extends \"layouts/base.njk\" %}");

    let names = project.compiler().discover().unwrap();
    assert_eq!(names, vec!["emails/reset", "emails/welcome"]);
}

#[test]
fn compile_all_writes_every_target() {
    let project = Project::sample();
    let report = project.compiler().compile_all().unwrap();

    assert!(report.is_success());
    assert_eq!(report.compiled, vec!["emails/reset", "emails/welcome"]);
    assert!(project.dist.join("emails/welcome.njk").is_file());
    assert!(project.dist.join("emails/reset.njk").is_file());
    assert!(!project.dist.join("layouts").exists());

    let single = project.compiler().compile_one("emails/welcome", false).unwrap();
    assert_eq!(read(&project.dist.join("emails/welcome.njk")), single.html);
}

#[test]
fn batch_continues_past_failures() {
    let project = Project::sample();
    project.add(
        "emails/broken.njk",
        "{% extends \"layouts/missing.njk\" %}{% block body %}x{% endblock %}",
    );

    let report = project.compiler().compile_all().unwrap();
    assert!(!report.is_success());
    assert_eq!(report.compiled, vec!["emails/reset", "emails/welcome"]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].name, "emails/broken");
    assert!(report.failed[0].error.contains("layouts/missing"));
    assert!(!project.dist.join("emails/broken.njk").exists());

    let json: serde_json::Value = serde_json::from_str(&report.to_json()).unwrap();
    assert_eq!(json["failed"][0]["name"], "emails/broken");
}

#[test]
fn missing_source_root_fails_the_batch() {
    let project = Project::empty();
    let config = CompileConfig::new(project.src.join("nope"), &project.dist);
    assert!(Compiler::new(config).compile_all().is_err());
}

// =====================================================================
// Failure handling
// =====================================================================

#[test]
fn malformed_markup_degrades_instead_of_failing() {
    let project = Project::empty();
    project.add("t.njk", "<columns>{{ a }}<!-- never closed");

    let out = Compiler::new(CompileConfig::new(&project.src, &project.dist))
        .compile_one("t", false)
        .unwrap();
    assert_eq!(out.html, "<columns>{{ a }}<!-- never closed");
}

#[test]
fn include_outside_the_root_is_rejected() {
    let project = Project::empty();
    fs::write(project.src.parent().unwrap().join("secret.txt"), "secret").unwrap();
    project.add("t.njk", "<p>{% include \"../secret.txt\" %}</p>");

    let err = project.compiler().compile_one("t", false).unwrap_err();
    assert!(matches!(err, CompileError::PathEscape { .. }), "got {err:?}");
}

#[test]
fn circular_includes_are_rejected() {
    let project = Project::empty();
    project
        .add("t.njk", "{% include \"a.njk\" %}")
        .add("a.njk", "a {% include \"b.njk\" %}")
        .add("b.njk", "b {% include \"a.njk\" %}");

    let err = project.compiler().compile_one("t", false).unwrap_err();
    assert!(matches!(err, CompileError::Circular(_)), "got {err:?}");
}

#[test]
fn circular_layouts_are_rejected() {
    let project = Project::empty();
    project
        .add("t.njk", "{% extends \"a.njk\" %}")
        .add("a.njk", "{% extends \"b.njk\" %}")
        .add("b.njk", "{% extends \"a.njk\" %}");

    let err = project.compiler().compile_one("t", false).unwrap_err();
    assert!(matches!(err, CompileError::Circular(_)), "got {err:?}");
}

#[test]
fn missing_template_is_not_found() {
    let project = Project::sample();
    let err = project.compiler().compile_one("emails/nope", false).unwrap_err();
    assert!(matches!(err, CompileError::NotFound(_)), "got {err:?}");
}

#[test]
fn config_file_drives_the_compiler() {
    let project = Project::sample();
    let root = project.src.parent().unwrap();
    let file = root.join("forge.json");
    fs::write(
        &file,
        r#"{ "source_root": "src", "dist_root": "dist", "stylesheet_path": "src/email.css" }"#,
    )
    .unwrap();

    let config = CompileConfig::from_file(&file).unwrap();
    let report = Compiler::new(config).compile_all().unwrap();
    assert!(report.is_success());
    assert!(project.dist.join("emails/welcome.njk").is_file());
}
