use anyhow::Result;
use regex::{Captures, Regex};
use std::collections::{HashMap, HashSet};

use super::source::{
    blank_comments, collapse_whitespace, find_matching, is_identifier, normalize_line_endings,
    skip_whitespace, split_parameters, LineIndex,
};
use super::symbol::{function_id, SourceFunction};

/// `returnType name(params)` followed by a balanced body.
const STANDARD_PATTERN: &str =
    r"(?m)(?:^|[;}])[ \t]*(?P<ret>[A-Za-z_][\w\s\*&]*[\s\*&])(?P<name>[A-Za-z_]\w*)[ \t]*\(";

/// Pre-ANSI definitions: identifier-only parameter list, optional
/// declaration list, then the body.
const LEGACY_PATTERN: &str = r"(?m)(?:^|[;}])[ \t]*(?P<ret>[A-Za-z_][\w\s\*]*[\s\*])(?P<name>[A-Za-z_]\w*)[ \t]*\((?P<params>[\w\s,\*]*)\)(?P<decls>(?:\s*[A-Za-z_][\w\s\*,\[\]]*;)*)\s*\{";

/// Return types carrying macro or attribute invocations.
const ANNOTATED_PATTERN: &str = r"(?m)(?:^|[;}])[ \t]*(?P<ret>(?:[A-Za-z_]\w*(?:[ \t]*\((?:[^()\n]|\([^()\n]*\))*\))?[\s\*&]+)+)(?P<name>[A-Za-z_]\w*)[ \t]*\(";

/// Last resort: any `type name(...) {` shape anywhere in the text.
const RELAXED_PATTERN: &str = r"(?P<ret>[A-Za-z_][\w\*]*(?:[ \t\*]+[A-Za-z_][\w\*]*)*)[ \t\n\*]+(?P<name>[A-Za-z_]\w*)[ \t\n]*\(";

/// Names that are never function definitions.
const EXCLUDED_NAMES: &[&str] = &["main"];

const CONTROL_KEYWORDS: &[&str] = &[
    "if", "else", "for", "while", "do", "switch", "case", "return", "sizeof", "goto",
    "break", "continue", "default",
];

/// Leading return-type tokens that mark a type definition or directive.
const TYPE_DEFINITION_KEYWORDS: &[&str] = &["struct", "enum", "union", "typedef"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Strategy {
    Standard,
    Legacy,
    Annotated,
    Relaxed,
}

#[derive(Debug)]
struct Candidate {
    name: String,
    return_type: String,
    parameters: Vec<String>,
    start: usize,
    end: usize,
}

/// Result of one extraction pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extraction {
    pub functions: Vec<SourceFunction>,
    /// The primary strategies found nothing and the relaxed pattern was used.
    pub degraded: bool,
}

/// Heuristic C function extractor.
///
/// Runs three patterns anchored at a line start or just after `;` or `}`,
/// in order, then a relaxed pattern if none of them produced anything.
/// Never fails on input text.
pub struct FunctionExtractor {
    standard: Regex,
    legacy: Regex,
    annotated: Regex,
    relaxed: Regex,
}

impl FunctionExtractor {
    pub fn new() -> Result<Self> {
        Ok(Self {
            standard: Regex::new(STANDARD_PATTERN)?,
            legacy: Regex::new(LEGACY_PATTERN)?,
            annotated: Regex::new(ANNOTATED_PATTERN)?,
            relaxed: Regex::new(RELAXED_PATTERN)?,
        })
    }

    pub fn extract(&self, file_path: &str, source: &str) -> Vec<SourceFunction> {
        self.extract_with_report(file_path, source).functions
    }

    pub fn extract_with_report(&self, file_path: &str, source: &str) -> Extraction {
        let original = normalize_line_endings(source);
        let text = blank_comments(&original);
        let mut pass = Pass::new(&text);

        for strategy in [Strategy::Standard, Strategy::Legacy, Strategy::Annotated] {
            self.run(strategy, &mut pass);
        }

        let degraded = pass.found.is_empty();
        if degraded {
            self.run(Strategy::Relaxed, &mut pass);
            if pass.found.is_empty() {
                tracing::debug!(file_path, "No functions found in source");
            } else {
                tracing::warn!(
                    file_path,
                    count = pass.found.len(),
                    "Primary extraction patterns matched nothing; used relaxed fallback"
                );
            }
        }

        let lines = LineIndex::new(&text);
        let functions = pass
            .found
            .into_iter()
            .map(|c| SourceFunction {
                id: function_id(file_path, &c.name),
                content: original[c.start..c.end].to_string(),
                start_line: Some(lines.line_of(c.start)),
                end_line: Some(lines.line_of(c.end.saturating_sub(1))),
                function_name: c.name,
                parameters: c.parameters,
                return_type: c.return_type,
                file_path: file_path.to_string(),
            })
            .collect();

        Extraction {
            functions,
            degraded,
        }
    }

    fn regex_for(&self, strategy: Strategy) -> &Regex {
        match strategy {
            Strategy::Standard => &self.standard,
            Strategy::Legacy => &self.legacy,
            Strategy::Annotated => &self.annotated,
            Strategy::Relaxed => &self.relaxed,
        }
    }

    fn run(&self, strategy: Strategy, pass: &mut Pass<'_>) {
        let re = self.regex_for(strategy);
        let text = pass.text;
        let mut pos = 0usize;

        while pos < text.len() {
            let Some(caps) = re.captures_at(text, pos) else {
                break;
            };
            let Some(whole) = caps.get(0) else {
                break;
            };
            let start = caps.name("ret").map_or(whole.start(), |m| m.start());

            if let Some(span_end) = pass.claimed_span_containing(start) {
                pos = span_end - 1;
                continue;
            }

            let candidate = match strategy {
                Strategy::Standard => complete_standard(text, &caps),
                Strategy::Legacy => complete_legacy(text, &caps),
                Strategy::Annotated => complete_annotated(text, &caps),
                Strategy::Relaxed => complete_relaxed(text, &caps),
            };

            match candidate {
                Some(c) => {
                    // Resume on the closing brace so it can anchor the next definition.
                    pos = if strategy == Strategy::Relaxed { c.end } else { c.end - 1 };
                    pass.accept(c);
                }
                None if strategy == Strategy::Relaxed => {
                    // Unanchored: step past the first word of the match.
                    pos = text[start..]
                        .find(|ch: char| !(ch.is_ascii_alphanumeric() || ch == '_'))
                        .map_or(text.len(), |rel| start + rel.max(1));
                }
                None => pos = whole.start() + 1,
            }
        }
    }
}

struct Pass<'a> {
    text: &'a str,
    claimed_names: HashSet<String>,
    claimed_spans: Vec<(usize, usize)>,
    found: Vec<Candidate>,
}

impl<'a> Pass<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            text,
            claimed_names: HashSet::new(),
            claimed_spans: Vec::new(),
            found: Vec::new(),
        }
    }

    fn claimed_span_containing(&self, offset: usize) -> Option<usize> {
        self.claimed_spans
            .iter()
            .find(|(s, e)| *s <= offset && offset < *e)
            .map(|(_, e)| *e)
    }

    fn accept(&mut self, candidate: Candidate) {
        self.claimed_spans.push((candidate.start, candidate.end));
        if EXCLUDED_NAMES.contains(&candidate.name.as_str()) {
            return;
        }
        if self.claimed_names.insert(candidate.name.clone()) {
            self.found.push(candidate);
        }
    }
}

fn rejects_name(name: &str) -> bool {
    !is_identifier(name) || CONTROL_KEYWORDS.contains(&name)
}

/// Refinements shared by the primary strategies.
fn rejects_return_type(ret: &str) -> bool {
    let ret = ret.trim_start();
    if ret.is_empty() || ret.contains(';') || ret.starts_with('#') {
        return true;
    }
    let first = ret
        .split(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .next()
        .unwrap_or_default();
    TYPE_DEFINITION_KEYWORDS.contains(&first) || CONTROL_KEYWORDS.contains(&first)
}

fn header<'t>(text: &'t str, caps: &Captures<'t>) -> Option<(usize, &'t str, String)> {
    let ret = caps.name("ret")?;
    let name = caps.name("name")?;
    let return_type = collapse_whitespace(&text[ret.start()..name.start()]);
    Some((ret.start(), name.as_str(), return_type))
}

/// Resolves `{` at `brace` to the offset just past its closing brace.
fn body_end(text: &str, brace: usize) -> Option<usize> {
    find_matching(text, brace, b'{', b'}').map(|close| close + 1)
}

fn complete_standard(text: &str, caps: &Captures<'_>) -> Option<Candidate> {
    let (start, name, return_type) = header(text, caps)?;
    if rejects_name(name) || rejects_return_type(&return_type) {
        return None;
    }
    let open = caps.get(0)?.end() - 1;
    let close = find_matching(text, open, b'(', b')')?;
    let after = skip_whitespace(text, close + 1);
    if text.as_bytes().get(after) != Some(&b'{') {
        // `;` here is a prototype; anything else is not this form.
        return None;
    }
    let end = body_end(text, after)?;
    Some(Candidate {
        name: name.to_string(),
        return_type,
        parameters: split_parameters(&text[open + 1..close]),
        start,
        end,
    })
}

fn complete_legacy(text: &str, caps: &Captures<'_>) -> Option<Candidate> {
    let (start, name, return_type) = header(text, caps)?;
    if rejects_name(name) || rejects_return_type(&return_type) {
        return None;
    }
    let brace = caps.get(0)?.end() - 1;
    let end = body_end(text, brace)?;

    let declared = caps
        .name("decls")
        .map(|d| parse_legacy_declarations(d.as_str()))
        .unwrap_or_default();
    let parameters = caps
        .name("params")
        .map(|p| split_parameters(p.as_str()))
        .unwrap_or_default()
        .into_iter()
        .map(|p| declared.get(&p).cloned().unwrap_or(p))
        .collect();

    Some(Candidate {
        name: name.to_string(),
        return_type,
        parameters,
        start,
        end,
    })
}

/// Maps each declared identifier to its typed declaration, e.g.
/// `int a, *b;` gives `a -> "int a"` and `b -> "int *b"`.
fn parse_legacy_declarations(decls: &str) -> HashMap<String, String> {
    let mut out = HashMap::new();
    for decl in decls.split(';') {
        let mut pieces = decl.split(',');
        let Some(first) = pieces.next().map(collapse_whitespace) else {
            continue;
        };
        let Some((base, first_name)) = split_declarator(&first) else {
            continue;
        };
        out.insert(first_name, first.clone());
        for piece in pieces {
            let piece = collapse_whitespace(piece);
            if let Some((_, ident)) = split_declarator(&format!("{base} {piece}")) {
                out.insert(ident, format!("{base} {piece}"));
            }
        }
    }
    out
}

/// Splits `int *name[4]` into the base type (`int`) and the identifier.
fn split_declarator(decl: &str) -> Option<(String, String)> {
    let trimmed = decl.split('[').next()?.trim_end();
    let ident_start = trimmed
        .rfind(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .map_or(0, |i| i + 1);
    let ident = &trimmed[ident_start..];
    if !is_identifier(ident) || ident_start == 0 {
        return None;
    }
    let base = trimmed[..ident_start].replace('*', " ");
    let base = collapse_whitespace(&base);
    if base.is_empty() {
        return None;
    }
    Some((base, ident.to_string()))
}

fn complete_annotated(text: &str, caps: &Captures<'_>) -> Option<Candidate> {
    let (start, name, return_type) = header(text, caps)?;
    if rejects_name(name) || rejects_return_type(&return_type) {
        return None;
    }
    let open = caps.get(0)?.end() - 1;
    let close = find_matching(text, open, b'(', b')')?;

    // Trailing attribute tokens, e.g. `__attribute__((noreturn))`.
    let bytes = text.as_bytes();
    let mut cursor = skip_whitespace(text, close + 1);
    while cursor < bytes.len() && (bytes[cursor].is_ascii_alphabetic() || bytes[cursor] == b'_') {
        let mut word_end = cursor;
        while word_end < bytes.len()
            && (bytes[word_end].is_ascii_alphanumeric() || bytes[word_end] == b'_')
        {
            word_end += 1;
        }
        cursor = skip_whitespace(text, word_end);
        if bytes.get(cursor) == Some(&b'(') {
            cursor = skip_whitespace(text, find_matching(text, cursor, b'(', b')')? + 1);
        }
    }
    if bytes.get(cursor) != Some(&b'{') {
        return None;
    }
    let end = body_end(text, cursor)?;
    Some(Candidate {
        name: name.to_string(),
        return_type,
        parameters: split_parameters(&text[open + 1..close]),
        start,
        end,
    })
}

fn complete_relaxed(text: &str, caps: &Captures<'_>) -> Option<Candidate> {
    let (start, name, return_type) = header(text, caps)?;
    if rejects_name(name) || return_type.is_empty() {
        return None;
    }
    let open = caps.get(0)?.end() - 1;
    let close = find_matching(text, open, b'(', b')')?;
    let rest = &text[close + 1..];
    let brace_rel = rest.find(|c: char| c == '{' || c == ';' || c == '}')?;
    if rest.as_bytes()[brace_rel] != b'{' {
        return None;
    }
    let brace = close + 1 + brace_rel;
    let end = body_end(text, brace)?;
    Some(Candidate {
        name: name.to_string(),
        return_type,
        parameters: split_parameters(&text[open + 1..close]),
        start,
        end,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use test_case::test_case;

    fn extractor() -> FunctionExtractor {
        FunctionExtractor::new().unwrap()
    }

    fn names(functions: &[SourceFunction]) -> Vec<&str> {
        functions.iter().map(|f| f.function_name.as_str()).collect()
    }

    #[test]
    fn extracts_simple_function() {
        let out = extractor().extract("math.c", "int add(int a, int b) { return a + b; }");
        assert_eq!(out.len(), 1);
        let f = &out[0];
        assert_eq!(f.function_name, "add");
        assert_eq!(f.return_type, "int");
        assert_eq!(f.parameters, vec!["int a".to_string(), "int b".to_string()]);
        assert_eq!(f.content, "int add(int a, int b) { return a + b; }");
        assert_eq!(f.file_path, "math.c");
        assert_eq!(f.id, function_id("math.c", "add"));
        assert_eq!(f.start_line, Some(1));
        assert_eq!(f.end_line, Some(1));
    }

    #[test]
    fn main_is_never_extracted() {
        let report = extractor().extract_with_report("m.c", "void main(void) { return; }");
        assert!(report.functions.is_empty());
        assert!(report.degraded);
    }

    #[test]
    fn prototypes_are_discarded() {
        let src = "int helper(int x);\n\nint helper(int x)\n{\n    return x * 2;\n}\n";
        let out = extractor().extract("h.c", src);
        assert_eq!(names(&out), vec!["helper"]);
        assert_eq!(out[0].start_line, Some(3));
        assert_eq!(out[0].end_line, Some(6));
    }

    #[test_case("static inline uint32_t\nread_reg(volatile uint32_t *base, size_t off)\n{ return base[off]; }",
                "read_reg", "static inline uint32_t"; "multi line return type")]
    #[test_case("char *dup(const char *s) { return 0; }", "dup", "char *"; "pointer return")]
    #[test_case("int_fast16_t NVS_erase(NVS_Handle handle, size_t offset, size_t size) {\n  return 0;\n}",
                "NVS_erase", "int_fast16_t"; "driver style signature")]
    fn return_type_is_whitespace_collapsed(src: &str, name: &str, ret: &str) {
        let out = extractor().extract("t.c", src);
        assert_eq!(names(&out), vec![name]);
        assert_eq!(out[0].return_type, ret);
    }

    #[test]
    fn struct_and_typedef_definitions_are_rejected() {
        let src = r#"
typedef struct {
    int x;
} point_t;

typedef int (*cmp_fn)(const void *, const void *);

struct node *make_node(int v) { return 0; }

int area(point_t p) { return p.x; }
"#;
        let out = extractor().extract("s.c", src);
        assert_eq!(names(&out), vec!["area"]);
    }

    #[test]
    fn statements_inside_bodies_are_not_functions() {
        let src = r#"
int run(int n)
{
    if (n > 0) {
        return run(n - 1);
    } else if (n < 0) {
        while (n) { n++; }
    }
    for (;;) { break; }
    return 0;
}
"#;
        let out = extractor().extract("r.c", src);
        assert_eq!(names(&out), vec!["run"]);
    }

    #[test]
    fn comments_are_ignored_but_kept_in_content() {
        let src = "/* int fake(void) { } */\n// int other(void) { }\nint real(void) /* tail */ { return 1; }\n";
        let out = extractor().extract("c.c", src);
        assert_eq!(names(&out), vec!["real"]);
        assert!(out[0].parameters.is_empty());
        assert_eq!(out[0].content, "int real(void) /* tail */ { return 1; }");
        assert_eq!(out[0].start_line, Some(3));
    }

    #[test]
    fn line_numbers_match_original_after_multiline_comments() {
        let src = "/*\n * header\n * more\n */\nvoid a(void)\n{\n}\n\n/* x\n y */\nvoid b(void) { }\n";
        let out = extractor().extract("l.c", src);
        assert_eq!(names(&out), vec!["a", "b"]);
        assert_eq!((out[0].start_line, out[0].end_line), (Some(5), Some(7)));
        assert_eq!((out[1].start_line, out[1].end_line), (Some(11), Some(11)));
    }

    #[test]
    fn legacy_parameter_declarations() {
        let src = "int\nscale(value, factor)\nint value;\nlong *factor;\n{\n    return value * *factor;\n}\n";
        let out = extractor().extract("k.c", src);
        assert_eq!(names(&out), vec!["scale"]);
        assert_eq!(
            out[0].parameters,
            vec!["int value".to_string(), "long *factor".to_string()]
        );
        assert_eq!(out[0].return_type, "int");
    }

    #[test]
    fn legacy_shared_declaration_line() {
        let decls = parse_legacy_declarations("\nint a, *b;\nchar c[8];");
        assert_eq!(decls.get("a").map(String::as_str), Some("int a"));
        assert_eq!(decls.get("b").map(String::as_str), Some("int *b"));
        assert_eq!(decls.get("c").map(String::as_str), Some("char c[8]"));
    }

    #[test]
    fn annotated_signatures() {
        let src = r#"
__attribute__((noinline)) static int slow_path(int x) { return x; }

WEAK_SYMBOL(handler) void isr_default(void) __attribute__((interrupt)) { }
"#;
        let out = extractor().extract("a.c", src);
        assert_eq!(names(&out), vec!["slow_path", "isr_default"]);
        assert_eq!(out[0].return_type, "__attribute__((noinline)) static int");
        assert_eq!(out[1].return_type, "WEAK_SYMBOL(handler) void");
    }

    #[test]
    fn cascade_preserves_strategy_order() {
        let src = "int\nold(a)\nint a;\n{ return a; }\n\nint fresh(int b) { return b; }\n";
        let out = extractor().extract("o.c", src);
        // The standard form claims `fresh` before the legacy form adds `old`.
        assert_eq!(names(&out), vec!["fresh", "old"]);
    }

    #[test]
    fn definitions_sharing_a_line_are_all_extracted() {
        let src = "static int a(void) { return 1; } static int b(void) { return 2; }\n";
        let report = extractor().extract_with_report("x.c", src);
        assert!(!report.degraded);
        let out = report.functions;
        assert_eq!(names(&out), vec!["a", "b"]);
        assert_eq!(out[1].return_type, "static int");
        assert_eq!(out[1].content, "static int b(void) { return 2; }");
        assert_eq!((out[1].start_line, out[1].end_line), (Some(1), Some(1)));
    }

    #[test_case("int a(void); int b(void) { return 0; }", &["b"]; "after prototype")]
    #[test_case("int count; int bump(void) { return ++count; }", &["bump"]; "after declaration")]
    #[test_case("void f(void) { }void g(void) { }", &["f", "g"]; "after brace without space")]
    fn definition_may_start_after_declaration_boundary(src: &str, expected: &[&str]) {
        let out = extractor().extract("b.c", src);
        assert_eq!(names(&out), expected);
    }

    #[test]
    fn duplicate_names_keep_first_definition() {
        let src = "#ifdef A\nint pick(void) { return 1; }\n#else\nint pick(void) { return 2; }\n#endif\n";
        let out = extractor().extract("d.c", src);
        assert_eq!(out.len(), 1);
        assert!(out[0].content.contains("return 1"));
    }

    #[test]
    fn relaxed_fallback_recovers_struct_returning_function() {
        let src = "struct pair make_pair(int a, int b) { struct pair p; return p; }";
        let report = extractor().extract_with_report("p.c", src);
        assert!(report.degraded);
        assert_eq!(names(&report.functions), vec!["make_pair"]);
        assert_eq!(report.functions[0].return_type, "struct pair");
    }

    #[test]
    fn unterminated_body_yields_nothing() {
        let out = extractor().extract("u.c", "int broken(int a) { if (a) { return 1; ");
        assert!(out.is_empty());
    }

    #[test]
    fn driver_file_extracts_every_public_function() {
        let src = r#"
#include <stdint.h>

static bool isInitialized = false;

const NVS_Params NVS_defaultParams = {
    NULL /* custom */
};

/*
 *  ======== NVS_close =======
 */
void NVS_close(NVS_Handle handle) { handle->fxnTablePtr->closeFxn(handle); }

/*
 *  ======== NVS_control ========
 */
int_fast16_t NVS_control(NVS_Handle handle, uint_fast16_t cmd, uintptr_t arg) {
  return (handle->fxnTablePtr->controlFxn(handle, cmd, arg));
}

void NVS_init(void) {
  uint_least8_t i;

  if (!isInitialized) {
    isInitialized = (bool)true;
    for (i = 0; i < NVS_count; i++) {
      NVS_config[i].fxnTablePtr->initFxn();
    }
  }
}
"#;
        let report = extractor().extract_with_report("NVS.c", src);
        assert!(!report.degraded);
        assert_eq!(
            names(&report.functions),
            vec!["NVS_close", "NVS_control", "NVS_init"]
        );
        assert_eq!(report.functions[1].parameters.len(), 3);
        assert_eq!(report.functions[2].start_line, Some(22));
    }

    proptest! {
        #[test]
        fn prop_extract_never_returns_main(src in r"[a-z_(){};, *\n/]{0,200}") {
            let out = extractor().extract("p.c", &src);
            prop_assert!(out.iter().all(|f| f.function_name != "main"));
        }

        #[test]
        fn prop_names_are_unique_identifiers(body in r"[a-z ]{0,20}", name in r"[a-z_][a-z0-9_]{0,8}") {
            let src = format!("int {name}(int a) {{ {body} }}\nint {name}(int b) {{ }}\n");
            let out = extractor().extract("p.c", &src);
            let mut seen = HashSet::new();
            for f in &out {
                prop_assert!(is_identifier(&f.function_name));
                prop_assert!(seen.insert(f.function_name.clone()));
            }
        }
    }
}
