//! Text shapes of the signature and n-parameter routines inside a player script
//!
//! Every compound pattern is assembled from the small fragments below, so a new
//! obfuscation variant usually means a new fragment rather than a new monolith.
//! The `regex` crate has no backreferences, so shapes that repeat an identifier
//! bound earlier in the same match are expressed as a [`BoundShape`].

use crate::error::DecipherError;
use regex::{Captures, Regex};
use std::collections::hash_map::Entry;
use std::collections::HashMap;

/// Identifier as emitted by the minifier
pub const VARIABLE_PART: &str = r"[a-zA-Z_\$][a-zA-Z_0-9\$]*";

const BEFORE_ACCESS: &str = r#"(?:\["|\.)"#;
const AFTER_ACCESS: &str = r#"(?:"\]|)"#;

const REVERSE_PART: &str = r":function\(\w\)\{(?:return )?\w\.reverse\(\)\}";
const SLICE_PART: &str = r":function\(\w,\w\)\{return \w\.slice\(\w\)\}";
const SPLICE_PART: &str = r":function\(\w,\w\)\{\w\.splice\(0,\w\)\}";
const SWAP_PART: &str = r":function\(\w,\w\)\{var \w=\w\[0\];\w\[0\]=\w\[\w%\w\.length\];\w\[\w(?:%\w\.length|)\]=\w(?:;return \w)?\}";

/// `Kq[3]` style lookup into a global string table
const TABLE_LOOKUP: &str = r"[a-zA-Z0-9_$]*\[\d+\]";

/// Single or double quoted string literal
const QUOTED: &str = r#"(?:"(?:\\.|[^\\])*?"|'(?:\\.|[^\\])*?')"#;

fn variable_part_define() -> String {
    [r#""?"#, VARIABLE_PART, r#""?"#].concat()
}

fn variable_part_access() -> String {
    [BEFORE_ACCESS, VARIABLE_PART, AFTER_ACCESS].concat()
}

fn split_argument() -> String {
    [r#"(?:""|"#, TABLE_LOOKUP, ")"].concat()
}

/// Escaped text of a named group, empty when the group did not take part
fn bound(caps: &Captures<'_>, name: &str) -> String {
    caps.name(name)
        .map(|m| regex::escape(m.as_str()))
        .unwrap_or_default()
}

/// A shape whose later text repeats identifiers declared earlier in the match.
///
/// `anchor` proposes candidate start positions and binds the identifiers;
/// `specialize` renders the full shape for those bindings, which then has to
/// match at exactly that position.
pub struct BoundShape {
    anchor: Regex,
    specialize: fn(&Captures<'_>) -> String,
}

impl BoundShape {
    fn new(anchor: &str, specialize: fn(&Captures<'_>) -> String) -> Result<Self, DecipherError> {
        Ok(Self {
            anchor: Regex::new(anchor)?,
            specialize,
        })
    }

    /// Find the leftmost occurrence of the shape in `haystack`
    pub fn find<'h>(&self, haystack: &'h str) -> Result<Option<&'h str>, DecipherError> {
        let mut specialized: HashMap<String, Regex> = HashMap::new();

        for caps in self.anchor.captures_iter(haystack) {
            let Some(head) = caps.get(0) else {
                continue;
            };

            let shape = match specialized.entry((self.specialize)(&caps)) {
                Entry::Occupied(entry) => entry.into_mut(),
                Entry::Vacant(entry) => {
                    let regex = Regex::new(&format!(r"\A(?:{})", entry.key()))?;
                    entry.insert(regex)
                }
            };

            if let Some(found) = shape.find(&haystack[head.start()..]) {
                return Ok(Some(found.as_str()));
            }
        }

        Ok(None)
    }
}

fn decipher_shape(caps: &Captures<'_>) -> String {
    let param = bound(caps, "param");
    [
        r"function(?: ",
        VARIABLE_PART,
        r")?\(",
        &param,
        r"\)\{",
        &param,
        "=",
        &param,
        r#"\.split\(""\);\s*((?:(?:"#,
        &param,
        "=)?",
        VARIABLE_PART,
        &variable_part_access(),
        r"\(",
        &param,
        r",\d+\);)+)return ",
        &param,
        r#"\.join\(""\)\}"#,
    ]
    .concat()
}

fn n_transform_shape(caps: &Captures<'_>) -> String {
    let param = bound(caps, "param");
    let array = bound(caps, "array");
    let table = bound(caps, "table");
    [
        r"(?s)function\(\s*(",
        &param,
        r")\s*\)\s*\{var\s*(",
        &array,
        r")=(?:",
        &param,
        r"\.split\(.*?\)|String\.prototype\.split\.call\(",
        &param,
        r",.*?\)),\s*(",
        &table,
        r")=(\[.*?\]);\s*",
        &table,
        r"\[\d+\](.*?try)(\{.*?\})catch\(\s*(\w+)\s*\)\s*\{",
        r#"\s*return"[\w-]+([A-z0-9-]+)"\s*\+\s*"#,
        &param,
        r"\s*\}\s*return\s*(",
        &array,
        r#"\.join\(""\)|Array\.prototype\.join\.call\("#,
        &array,
        r",.*?\))\};",
    ]
    .concat()
}

fn n_transform_tce_shape(caps: &Captures<'_>) -> String {
    let param = bound(caps, "param");
    let array = bound(caps, "array");
    [
        r"(?s)function\(\s*(",
        &param,
        r")\s*\)\s*\{\s*var\s*(",
        &array,
        ")=",
        &param,
        r"\.split\(",
        &param,
        r"\.slice\(0,0\)\),\s*(\w+)=\[.*?\];.*?catch\(\s*(\w+)\s*\)\s*\{",
        r#"\s*return(?:"[^"]+"|\s*"#,
        TABLE_LOOKUP,
        r")\s*\+\s*",
        &param,
        r"\s*\}\s*return\s*",
        &array,
        r"\.join\(",
        &split_argument(),
        r"\)\};",
    ]
    .concat()
}

/// Compiled set of known script shapes
pub struct PatternLibrary {
    /// `var H={key:function(a){...},...};` with the four primitive operations
    pub helper_object: Regex,
    pub reverse_key: Regex,
    pub slice_key: Regex,
    pub splice_key: Regex,
    pub swap_key: Regex,
    /// Decipher function calling into the helper object
    pub decipher: BoundShape,
    /// Decipher function reading its split/join arguments from a global table
    pub decipher_tce: Regex,
    /// n-transform function with an inline lookup table and exception fallback
    pub n_transform: BoundShape,
    pub n_transform_tce: BoundShape,
    /// Top-level `var` holding a string split or a literal string array
    pub global_vars: Regex,
    /// Single declared parameter of a function expression
    pub parameter: Regex,
}

impl PatternLibrary {
    /// Compile the shape library
    pub fn new() -> Result<Self, DecipherError> {
        let define = variable_part_define();
        let access = variable_part_access();

        let helper_object = [
            r"(?s)var (",
            VARIABLE_PART,
            r")=\{((?:(?:",
            &define,
            REVERSE_PART,
            "|",
            &define,
            SLICE_PART,
            "|",
            &define,
            SPLICE_PART,
            "|",
            &define,
            SWAP_PART,
            r"),?\n?)+)\};",
        ]
        .concat();

        let key_prefix = [r#"(?m)(?:^|,)"?("#, VARIABLE_PART, r#")"?"#].concat();

        let decipher_tce = [
            r"(?s)function(?:\s+",
            VARIABLE_PART,
            r")?\(\w\)\{\w=\w\.split\(",
            &split_argument(),
            r"\);\s*((?:(?:\w=)?",
            VARIABLE_PART,
            &access,
            r"\(\w,\d+\);)+)return \w\.join\(",
            &split_argument(),
            r"\)\}",
        ]
        .concat();

        let global_vars = [
            r"(?m)(?:^|[;,])\s*(var\s+([\w$]+)\s*=\s*(?:",
            QUOTED,
            r"\s*\.\s*split\((",
            QUOTED,
            r")\)|\[\s*(?:",
            QUOTED,
            r"\s*,?\s*)+\]))\s*[,;]",
        ]
        .concat();

        let decipher_anchor = [
            r"function(?: ",
            VARIABLE_PART,
            r#")?\((?P<param>[a-zA-Z])\)\{[a-zA-Z]=[a-zA-Z]\.split\(""\);"#,
        ]
        .concat();

        Ok(Self {
            helper_object: Regex::new(&helper_object)?,
            reverse_key: Regex::new(&[key_prefix.as_str(), REVERSE_PART].concat())?,
            slice_key: Regex::new(&[key_prefix.as_str(), SLICE_PART].concat())?,
            splice_key: Regex::new(&[key_prefix.as_str(), SPLICE_PART].concat())?,
            swap_key: Regex::new(&[key_prefix.as_str(), SWAP_PART].concat())?,
            decipher: BoundShape::new(&decipher_anchor, decipher_shape)?,
            decipher_tce: Regex::new(&decipher_tce)?,
            n_transform: BoundShape::new(
                r"function\(\s*(?P<param>\w+)\s*\)\s*\{var\s*(?P<array>\w+)=(?:\w+\.split\(|String\.prototype\.split\.call\(\w+,)[^;]*?,\s*(?P<table>\w+)=\[",
                n_transform_shape,
            )?,
            n_transform_tce: BoundShape::new(
                r"function\(\s*(?P<param>\w+)\s*\)\s*\{\s*var\s*(?P<array>\w+)=\w+\.split\(\w+\.slice\(0,0\)\),",
                n_transform_tce_shape,
            )?,
            global_vars: Regex::new(&global_vars)?,
            parameter: Regex::new(r"function\s*\(\s*(\w+)\s*\)")?,
        })
    }

    /// Inline `if(typeof X==="...")return param;` guard of an n-transform function
    pub fn typeof_guard(&self, param: &str) -> Result<Regex, DecipherError> {
        Ok(Regex::new(&format!(
            r"if\s*\(typeof\s*[^\s()]+\s*===?.*?\)return {}\b\s*;?",
            regex::escape(param)
        ))?)
    }
}
