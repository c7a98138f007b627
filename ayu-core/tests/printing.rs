//! Integration tests for printing.
//!
//! Output in every layout must parse back to an equal tree, and JSON output
//! must be accepted by serde_json.

use ayu_core::{parse_str, print, print_file, PrintOptions, Tree, TreeFlags};
use pretty_assertions::assert_eq;

// =============================================================================
// Test Helpers
// =============================================================================

const LAYOUTS: [PrintOptions; 4] = [
    PrintOptions::COMPACT,
    PrintOptions::PRETTY,
    PrintOptions::JSON,
    PrintOptions::PRETTY.union(PrintOptions::JSON),
];

const DOCUMENT: &str = r#"
{
    name: "Short Sword"
    id: 0x2a
    weight: 1.25
    tags: [melee one-handed "starter kit"]
    stats: {attack: 7 speed: -1 crit: 0.05}
    notes: "first line\nsecond line"
    drops: [
        {from: goblin chance: 0.1}
        {from: "cave troll" chance: 0.02}
    ]
    upgrades: []
    meta: {}
    unique: false
    owner: null
}
"#;

fn document() -> Tree {
    parse_str(DOCUMENT).unwrap()
}

fn reparse(tree: &Tree, options: PrintOptions) -> Tree {
    let text = print(tree, options).unwrap();
    parse_str(&text).unwrap_or_else(|err| panic!("{options:?} output doesn't parse: {err}\n{text}"))
}

// =============================================================================
// Round trips
// =============================================================================

#[test]
fn every_layout_round_trips() {
    let tree = document();
    for options in LAYOUTS {
        assert_eq!(reparse(&tree, options), tree, "{options:?}");
    }
}

#[test]
fn printing_is_idempotent() {
    let tree = document();
    for options in LAYOUTS {
        let once = print(&tree, options).unwrap();
        let twice = print(&parse_str(&once).unwrap(), options).unwrap();
        assert_eq!(once, twice, "{options:?}");
    }
}

#[test]
fn hex_survives_ayu_layouts() {
    let tree = parse_str("[0x10 -0x1 0x1.8p1]").unwrap();
    assert_eq!(print(&tree, PrintOptions::COMPACT).unwrap(), "[0x10 -0x1 0x3]");
    let back = reparse(&tree, PrintOptions::COMPACT);
    assert!(back.elem(0).unwrap().flags().contains(TreeFlags::PREFER_HEX));
    assert_eq!(print(&tree, PrintOptions::JSON).unwrap(), "[16,-1,3]");
}

#[test]
fn extreme_numbers_round_trip() {
    let values = [
        i64::MIN as f64,
        f64::MAX,
        f64::MIN_POSITIVE,
        5e-324,
        0.1 + 0.2,
        1e21,
        123_456_789.012_345_68,
    ];
    for value in values {
        let tree = Tree::from(value);
        for options in LAYOUTS {
            assert_eq!(reparse(&tree, options).as_f64().unwrap(), value, "{value} {options:?}");
        }
    }
    let ints = Tree::array([Tree::from(i64::MIN), Tree::from(i64::MAX)]);
    for options in LAYOUTS {
        assert_eq!(reparse(&ints, options), ints);
    }
}

// =============================================================================
// JSON
// =============================================================================

#[test]
fn json_output_is_json() {
    let tree = document();
    for options in [PrintOptions::JSON, PrintOptions::PRETTY | PrintOptions::JSON] {
        let text = print(&tree, options).unwrap();
        let json: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(json["name"], "Short Sword");
        assert_eq!(json["id"], 42);
        assert_eq!(json["tags"][2], "starter kit");
        assert_eq!(json["drops"][1]["from"], "cave troll");
        assert_eq!(json["notes"], "first line\nsecond line");
        assert!(json["owner"].is_null());
    }
}

#[test]
fn json_escapes_control_characters() {
    let tree = Tree::from("bell\u{7} tab\t quote\" back\\");
    let text = print(&tree, PrintOptions::JSON).unwrap();
    let json: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(json, "bell\u{7} tab\t quote\" back\\");
}

#[test]
fn json_specials() {
    let tree = Tree::array([Tree::from(f64::NAN), Tree::from(f64::INFINITY), Tree::from(f64::NEG_INFINITY)]);
    assert_eq!(print(&tree, PrintOptions::JSON).unwrap(), "[null,1e999,-1e999]");
    let back = reparse(&tree, PrintOptions::JSON);
    assert!(back.elem(0).unwrap().is_null());
    assert_eq!(back.elem(1).unwrap().as_f64().unwrap(), f64::INFINITY);
}

// =============================================================================
// Pretty layout
// =============================================================================

#[test]
fn pretty_document_shape() {
    let text = print(&document(), PrintOptions::PRETTY).unwrap();
    let expected = r#"{
    name: "Short Sword"
    id: 0x2a
    weight: 1.25
    tags: [melee one-handed "starter kit"]
    stats: {
        attack: 7
        speed: -1
        crit: 0.05
    }
    notes: "first line\nsecond line"
    drops: [
        {
            from: goblin
            chance: 0.1
        } -- 0
        {
            from: "cave troll"
            chance: 0.02
        } -- 1
    ]
    upgrades: []
    meta: {}
    unique: false
    owner: null
}"#;
    assert_eq!(text, expected);
}

#[test]
fn compact_document_shape() {
    let tree = parse_str("{a:[1 2] b:{c:\"x y\"} d:[]}").unwrap();
    assert_eq!(print(&tree, PrintOptions::COMPACT).unwrap(), r#"{a:[1 2] b:{c:"x y"} d:[]}"#);
    assert_eq!(print(&tree, PrintOptions::empty()).unwrap(), r#"{a:[1 2] b:{c:"x y"} d:[]}"#);
}

// =============================================================================
// Files
// =============================================================================

#[test]
fn print_file_writes_pretty_with_newline() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("out.ayu");
    let tree = parse_str("{a:1 b:2}").unwrap();

    print_file(&tree, &path, PrintOptions::empty()).unwrap();
    assert_eq!(std::fs::read_to_string(&path).unwrap(), "{\n    a: 1\n    b: 2\n}\n");

    print_file(&tree, &path, PrintOptions::COMPACT).unwrap();
    assert_eq!(std::fs::read_to_string(&path).unwrap(), "{a:1 b:2}\n");

    let missing = dir.path().join("no/such/dir/out.ayu");
    assert_eq!(print_file(&tree, &missing, PrintOptions::empty()).unwrap_err().code(), "IOOpenFailed");
}
