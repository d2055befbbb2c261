use std::fs;
use std::path::{Path, PathBuf};

use rstest::rstest;
use spa_pack_rs::{BuildConfig, BuildEnvironment, BuildError, BuildReport, Builder, ChunkKind, Stage};

const CONFIG: &str = r#"{
  "entries": { "app": "./src/main.js", "admin": ["./src/admin.js"] },
  "chunkPolicy": { "vendorAllowList": ["jquery"] },
  "plugins": { "html": { "title": "Demo" } }
}"#;

const MAIN_JS: &str = r#"import $ from 'jquery';
import App from './App.vue';
import './main.less';
import data from './data.json';
import { helper } from './shared';

if (process.env.NODE_ENV !== 'production') {
  console.log('development build');
}

$(function () {
  var message = helper(data.name);
  $('#app').html(App.template + message);
});
"#;

const ADMIN_JS: &str = r#"import $ from 'jquery';
import { helper } from './shared';
import banner from './big.png';

$('#admin').attr('src', banner).text(helper('admin'));
"#;

const SHARED_JS: &str = "export function helper(name) {\n  return 'hello ' + name;\n}\n";

const APP_VUE: &str = r#"<template>
  <div class="app"><img src="./logo.png"></div>
</template>

<script>
export default {
  name: 'app'
};
</script>

<style>
.app { color: red; }
</style>
"#;

const MAIN_LESS: &str = "@brand: #336699;\n// page chrome\nbody { color: @brand; background: url(./logo.png); }\n";

struct Project {
    dir: tempfile::TempDir,
}

impl Project {
    fn new(config: &str) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let project = Self { dir };
        project.write("spa-pack.json", config.as_bytes());
        project.write("src/main.js", MAIN_JS.as_bytes());
        project.write("src/admin.js", ADMIN_JS.as_bytes());
        project.write("src/shared.js", SHARED_JS.as_bytes());
        project.write("src/App.vue", APP_VUE.as_bytes());
        project.write("src/main.less", MAIN_LESS.as_bytes());
        project.write("src/data.json", "\u{feff}{ \"name\": \"spa\" }".as_bytes());
        project.write("src/logo.png", b"\x89PNG\r\n\x1a\nsmall");
        project.write("src/big.png", &vec![7u8; 9000]);
        project.write("node_modules/jquery/package.json", br#"{ "name": "jquery", "main": "dist/jquery.js" }"#);
        project.write(
            "node_modules/jquery/dist/jquery.js",
            b"module.exports = function jQuery(selector) { return selector; };\n",
        );
        project
    }

    fn root(&self) -> &Path {
        self.dir.path()
    }

    fn out(&self) -> PathBuf {
        self.root().join("build")
    }

    fn write(&self, rel: &str, bytes: &[u8]) {
        let path = self.root().join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, bytes).unwrap();
    }

    fn read(&self, rel: &str) -> String {
        fs::read_to_string(self.out().join(rel)).unwrap()
    }

    fn build(&self, mode: BuildEnvironment) -> Result<BuildReport, BuildError> {
        let _ = env_logger::builder().is_test(true).try_init();
        let config = BuildConfig::from_path(&self.root().join("spa-pack.json"), Some(mode))?;
        Builder::new(config).build()
    }
}

/// Path below `out` of the single written file matching `pattern`.
fn written(report: &BuildReport, out: &Path, pattern: &str) -> String {
    let re = regex::Regex::new(&format!("^{pattern}$")).unwrap();
    let matches: Vec<String> = report
        .files
        .iter()
        .filter_map(|file| file.strip_prefix(out).ok())
        .map(|file| file.to_string_lossy().replace('\\', "/"))
        .filter(|file| re.is_match(file))
        .collect();
    assert_eq!(matches.len(), 1, "{pattern} in {:?}", report.files);
    matches[0].clone()
}

#[test]
fn test_development_build() {
    let project = Project::new(CONFIG);
    let report = project.build(BuildEnvironment::Development).unwrap();
    let out = project.out();

    let chunk_names: Vec<_> = report.chunks.iter().map(|c| (c.name.as_str(), c.kind)).collect();
    assert_eq!(
        chunk_names,
        vec![("vendor", ChunkKind::Vendor), ("app", ChunkKind::Entry), ("admin", ChunkKind::Entry)]
    );
    for file in ["common.bundle.js", "app.bundle.js", "admin.bundle.js", "app.bundle.css", "index.html"] {
        assert!(report.files.contains(&out.join(file)), "missing {file} in {:?}", report.files);
    }

    let vendor = project.read("common.bundle.js");
    let app = project.read("app.bundle.js");
    assert!(vendor.contains("function jQuery(selector)"));
    assert!(!vendor.contains("__spa__.require("));
    assert!(!app.contains("function jQuery(selector)"));
    assert!(app.contains("__spa__.define("));
    let mut tail = app.trim_end().lines().rev();
    assert_eq!(tail.next(), Some("//# sourceMappingURL=app.bundle.js.map"));
    assert!(tail.next().unwrap().starts_with("__spa__.require("));

    // define-injection ran, but nothing is folded or minified in development
    assert!(app.contains(r#"if ("development" !== 'production')"#));
    assert!(app.contains("console.log('development build')"));
    assert!(app.contains("<div class=\\\"app\\\">"));
    assert!(app.contains("data:image/png;base64,"));

    // styles of the chunk are extracted in traversal order
    let css = project.read("app.bundle.css");
    let component = css.find(".app { color: red; }").unwrap();
    let page = css.find("body { color: #336699;").unwrap();
    assert!(component < page, "{css}");
    assert!(css.contains("url(\"data:image/png;base64,"));
    assert!(!css.contains("page chrome"));

    // the large image is emitted, and the script references its URL
    let admin = project.read("admin.bundle.js");
    let image = report
        .files
        .iter()
        .find(|f| f.starts_with(out.join("images")))
        .expect("emitted image");
    let image_name = image.file_name().unwrap().to_string_lossy();
    assert!(image_name.starts_with("big.") && image_name.ends_with(".png"));
    assert!(admin.contains(&format!("images/{image_name}")));

    let html = project.read("index.html");
    assert!(html.contains("<title>Demo</title>"));
    assert!(html.contains("<link href=\"app.bundle.css\" rel=\"stylesheet\">"));
    let vendor_tag = html.find("src=\"common.bundle.js\"").unwrap();
    let app_tag = html.find("src=\"app.bundle.js\"").unwrap();
    let admin_tag = html.find("src=\"admin.bundle.js\"").unwrap();
    assert!(vendor_tag < app_tag && app_tag < admin_tag);
}

#[test]
fn test_production_build() {
    let project = Project::new(CONFIG);
    project.write("build/stale.js", b"old");
    let report = project.build(BuildEnvironment::Production).unwrap();
    let out = project.out();

    assert_eq!(report.environment, BuildEnvironment::Production);
    assert!(!out.join("stale.js").exists());
    assert!(report.files.iter().all(|f| !f.to_string_lossy().contains('?')));
    assert!(report.files.iter().all(|f| f.extension().is_some_and(|ext| ext != "map")));

    // the content hash is part of every chunk's file path
    let app_js = written(&report, &out, r"app\.[0-9a-f]{8}\.bundle\.js");
    let app_css = written(&report, &out, r"app\.[0-9a-f]{8}\.bundle\.css");
    let vendor_js = written(&report, &out, r"common\.[0-9a-f]{8}\.bundle\.js");
    assert!(!out.join("app.bundle.js").exists());

    let app = project.read(&app_js);
    assert!(!app.contains("development build"));
    assert!(!app.contains("\n  "));
    assert!(!app.contains("sourceMappingURL"));
    assert!(project.read(&vendor_js).contains("jQuery"));

    let html = project.read("index.html");
    assert!(html.contains(&format!("src=\"{app_js}\"")), "{html}");
    assert!(html.contains(&format!("href=\"{app_css}\"")), "{html}");
    assert!(html.contains("rel=\"stylesheet\""));
    assert!(!html.contains("\n  "));

    let css = project.read(&app_css);
    assert!(css.contains(".app{color:red}"), "{css}");
}

#[test]
fn test_file_names_change_with_content_only() {
    let project = Project::new(CONFIG);
    let out = project.out();
    let first = project.build(BuildEnvironment::Production).unwrap();
    let app = written(&first, &out, r"app\.[0-9a-f]{8}\.bundle\.js");
    let admin = written(&first, &out, r"admin\.[0-9a-f]{8}\.bundle\.js");
    let vendor = written(&first, &out, r"common\.[0-9a-f]{8}\.bundle\.js");

    project.write("src/admin.js", format!("{ADMIN_JS}console.log('second release');\n").as_bytes());
    let second = project.build(BuildEnvironment::Production).unwrap();
    let changed_admin = written(&second, &out, r"admin\.[0-9a-f]{8}\.bundle\.js");
    assert_ne!(changed_admin, admin);
    assert!(project.read(&changed_admin).contains("second release"));
    assert_eq!(written(&second, &out, r"app\.[0-9a-f]{8}\.bundle\.js"), app);
    assert_eq!(written(&second, &out, r"common\.[0-9a-f]{8}\.bundle\.js"), vendor);
    // the previous admin script went away with the clean
    assert!(!out.join(&admin).exists());
    assert!(project.read("index.html").contains(&changed_admin));
}

#[test]
fn test_colliding_file_names_keep_previous_output() {
    let project = Project::new(
        r#"{ "entries": { "app": "./src/pictures.js" },
             "transformRules": [
                 { "test": "\\.js$", "use": [{ "loader": "script" }] },
                 { "test": "\\.png$", "use": [{ "loader": "url", "options": { "limit": 0, "name": "images/[name].[ext]" } }] }
             ] }"#,
    );
    project.write("src/pictures.js", b"import a from './a/logo.png';\nimport b from './b/logo.png';\n");
    project.write("src/a/logo.png", b"first");
    project.write("src/b/logo.png", b"second");
    project.write("build/previous.js", b"old");

    match project.build(BuildEnvironment::Production).unwrap_err() {
        BuildError::Config(message) => assert!(message.contains("images/logo.png"), "{message}"),
        other => panic!("unexpected error {other:?}"),
    }
    assert!(project.out().join("previous.js").exists());
    assert!(!project.out().join("images").exists());
}

#[test]
fn test_dry_clean_keeps_previous_output() {
    let project = Project::new(
        r#"{ "entries": { "app": "./src/main.js" },
             "chunkPolicy": { "vendorAllowList": ["jquery"] },
             "plugins": { "clean": { "dry": true, "verbose": true } } }"#,
    );
    project.write("build/stale.js", b"old");
    let report = project.build(BuildEnvironment::Production).unwrap();
    assert!(project.out().join("stale.js").exists());
    written(&report, &project.out(), r"app\.[0-9a-f]{8}\.bundle\.js");
}

#[test]
fn test_imports_in_comments_and_strings_are_ignored() {
    let project = Project::new(CONFIG);
    project.write(
        "src/admin.js",
        b"/*\nimport old from './removed';\n*/\n// require('./gone')\nvar hint = \"import x from './nowhere'\";\nexport var ok = hint;\n",
    );
    project.build(BuildEnvironment::Development).unwrap();

    let admin = project.read("admin.bundle.js");
    assert!(admin.contains("import old from './removed';"));
    assert!(admin.contains("// require('./gone')"));
    assert!(admin.contains("\"import x from './nowhere'\""));
}

#[test]
fn test_development_source_maps() {
    let project = Project::new(CONFIG);
    let report = project.build(BuildEnvironment::Development).unwrap();
    let out = project.out();
    assert!(report.files.contains(&out.join("app.bundle.js.map")));

    let map: serde_json::Value = serde_json::from_str(&project.read("app.bundle.js.map")).unwrap();
    assert_eq!(map["version"], 3);
    assert_eq!(map["file"], "app.bundle.js");
    let sources: Vec<&str> = map["sources"].as_array().unwrap().iter().filter_map(|s| s.as_str()).collect();
    assert!(sources.contains(&"spa-pack:///src/main.js"), "{sources:?}");
    let main = sources.iter().position(|s| *s == "spa-pack:///src/main.js").unwrap();
    assert_eq!(map["sourcesContent"][main], MAIN_JS);
    // one group per generated line
    let app = project.read("app.bundle.js");
    let groups = map["mappings"].as_str().unwrap().split(';').count();
    assert_eq!(groups, app.lines().count() - 1);

    let disabled = Project::new(
        r#"{ "entries": { "app": "./src/main.js" }, "output": { "sourceMap": false },
             "chunkPolicy": { "vendorAllowList": ["jquery"] } }"#,
    );
    let report = disabled.build(BuildEnvironment::Development).unwrap();
    assert!(!report.files.iter().any(|f| f.to_string_lossy().ends_with(".map")));
    assert!(!disabled.read("app.bundle.js").contains("sourceMappingURL"));
}


#[test]
fn test_production_hashes_are_stable() {
    let project = Project::new(CONFIG);
    project.build(BuildEnvironment::Production).unwrap();
    let first = project.read("index.html");
    project.build(BuildEnvironment::Production).unwrap();
    assert_eq!(project.read("index.html"), first);
}

#[rstest]
#[case("\"never\"", false)]
#[case("2", true)]
#[case("\"all\"", true)]
fn test_shared_module_extraction(#[case] min_reference_count: &str, #[case] in_vendor: bool) {
    let config = format!(
        r#"{{ "entries": {{ "app": "./src/main.js", "admin": "./src/admin.js" }},
             "chunkPolicy": {{ "vendorAllowList": ["jquery"], "minReferenceCount": {} }} }}"#,
        min_reference_count
    );
    let project = Project::new(&config);
    project.build(BuildEnvironment::Development).unwrap();

    let vendor = project.read("common.bundle.js");
    let app = project.read("app.bundle.js");
    let admin = project.read("admin.bundle.js");
    assert_eq!(vendor.contains("'hello ' + name"), in_vendor);
    assert_eq!(app.contains("'hello ' + name"), !in_vendor);
    assert!(!admin.contains("'hello ' + name"));
}

#[test]
fn test_missing_module_leaves_output_untouched() {
    let project = Project::new(CONFIG);
    project.write("build/stale.js", b"old");
    project.write("src/admin.js", b"import './missing';\n");

    let err = project.build(BuildEnvironment::Production).unwrap_err();
    match err {
        BuildError::ModuleNotFound { requester, request, .. } => {
            assert!(requester.ends_with("src/admin.js"));
            assert_eq!(request, "./missing");
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert!(project.out().join("stale.js").exists());
}

#[test]
fn test_unmatched_asset_type_is_fatal() {
    let project = Project::new(CONFIG);
    project.write("src/notes.md", b"# notes");
    project.write("src/admin.js", b"import notes from './notes.md';\n");

    match project.build(BuildEnvironment::Development).unwrap_err() {
        BuildError::UnmatchedAssetType { path } => assert!(path.ends_with("src/notes.md")),
        other => panic!("unexpected error {other:?}"),
    }
}

#[test]
fn test_clean_refuses_context_root() {
    let project = Project::new(
        r#"{ "entries": { "app": "./src/main.js" }, "outputRoot": ".", "chunkPolicy": { "vendorAllowList": ["jquery"] } }"#,
    );
    match project.build(BuildEnvironment::Production).unwrap_err() {
        BuildError::PluginFailure { plugin, stage, .. } => {
            assert_eq!(plugin, "clean");
            assert_eq!(stage, Stage::PreEmit);
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert!(project.root().join("src/main.js").exists());
}

#[test]
fn test_provide_injects_bindings() {
    let project = Project::new(
        r#"{ "entries": { "app": "./src/main.js" },
             "chunkPolicy": { "vendorAllowList": ["jquery"] },
             "plugins": { "provide": { "jQuery": "jquery" } } }"#,
    );
    project.write("src/main.js", b"jQuery('#app');\n");
    project.build(BuildEnvironment::Development).unwrap();

    let app = project.read("app.bundle.js");
    assert!(app.contains("var jQuery = __spa_require__("), "{app}");
    // the provided module itself is never rewritten
    let vendor = project.read("common.bundle.js");
    assert!(!vendor.contains("var jQuery = __spa_require__("));
}

fn copy_tree(from: &Path, to: &Path) {
    fs::create_dir_all(to).unwrap();
    for entry in fs::read_dir(from).unwrap() {
        let entry = entry.unwrap();
        let target = to.join(entry.file_name());
        if entry.file_type().unwrap().is_dir() {
            copy_tree(&entry.path(), &target);
        } else {
            fs::copy(entry.path(), target).unwrap();
        }
    }
}

#[rstest]
#[case(BuildEnvironment::Development)]
#[case(BuildEnvironment::Production)]
fn test_demo_project(#[case] mode: BuildEnvironment) {
    let demo = Path::new(env!("CARGO_MANIFEST_DIR")).join("../demos/spa");
    let dir = tempfile::tempdir().unwrap();
    copy_tree(&demo, dir.path());

    let config = BuildConfig::from_path(&dir.path().join("spa-pack.json"), Some(mode)).unwrap();
    let report = Builder::new(config).build().unwrap();
    let names: Vec<_> = report.chunks.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["vendor", "app", "about"]);

    let out = dir.path().join("build");
    let hash = if mode.is_production() { r"\.[0-9a-f]{8}" } else { "" };
    let vendor = written(&report, &out, &format!(r"common{hash}\.bundle\.js"));
    let vendor = fs::read_to_string(out.join(vendor)).unwrap();
    // `format.js` is imported by both entries, so it joins the vendor chunk
    assert!(vendor.contains("toUpperCase"));
    let html = fs::read_to_string(out.join("index.html")).unwrap();
    assert!(html.contains("spa-pack demo"));
    let css = written(&report, &out, &format!(r"app{hash}\.bundle\.css"));
    let css = fs::read_to_string(out.join(css)).unwrap();
    assert!(css.contains("#2a7ae2"));
    assert!(css.contains("1px solid #ddd"));
}
