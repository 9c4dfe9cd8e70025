//! K&R varargs to ANSI stdarg conversion
//!
//! Old sources declare variadic functions the pre-ANSI way:
//!
//! ```c
//! void
//! Fail(fmt, va_alist)
//!     char *fmt;
//!     va_dcl
//! {
//!     va_list args;
//!     va_start(args);
//! ```
//!
//! Modern compilers reject that form. This rule rewrites each such definition
//! into `Fail(char *fmt, ...)`, swaps `<varargs.h>` for a `__STDC__` switch
//! that defines `va_init_list`, and rewrites the matching prototypes in the
//! public headers.

use super::{bytes, WorkingTree};
use crate::error::Result;
use regex::bytes::{Captures, NoExpand, Regex};
use std::collections::{BTreeMap, HashMap};
use std::sync::LazyLock;

const STDARG_SWITCH: &[u8] = b"#ifdef __STDC__
#include <stdarg.h>
#define va_init_list(a,b) va_start(a,b)
#else
#include <varargs.h>
#define va_init_list(a,b) va_start(a)
#endif
";

static VARARGS_INCLUDE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m-u)^#include <varargs\.h>\n").expect("valid regex"));
static STDARG_INCLUDE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m-u)^#include <stdarg\.h>\n").expect("valid regex"));

// name(args, va_alist) / indented declarations / va_dcl / body up to the first
// closing brace at the start of a line
static KR_DEFINITION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?m-u)^([A-Za-z][A-Za-z0-9_]*)\((.*), va_alist\)\n((?: .*;\n)*)( +va_dcl\n)(\{.*\n(?:.*\n)*?\})",
    )
    .expect("valid regex")
});
static IDENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?-u)[a-z_][a-z_0-9]*").expect("valid regex"));
static DECL_TRIM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?-u)^ +|;\n").expect("valid regex"));
static VA_START: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?-u)va_start\(([a-z]+)\)").expect("valid regex"));

static TYPE_ERROR_DECL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m-u)^extern void TypeError\(\);").expect("valid regex"));
static ARG_ERROR_DECL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m-u)^ *void ArgError\(\);").expect("valid regex"));

static GNUC_STATIC_VOIDFN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m-u)^#ifdef __GNUC__\nstatic volatile voidfn").expect("valid regex")
});
static GNUC_TYPEDEF_VOIDFN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m-u)^#ifdef __GNUC__\ntypedef void voidfn").expect("valid regex")
});
static GNUC_VOLATILE_VOIDFN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m-u)^#ifdef __GNUC__\nvolatile voidfn").expect("valid regex")
});

/// Converted function name mapped to its new declaration, e.g.
/// `Fail` -> `Fail(char *fmt, ...)`
type Converted = BTreeMap<Vec<u8>, Vec<u8>>;

/// Rewrite varargs definitions in top-level `*.c` files and their prototypes
/// in `intern.h` and `ruby.h`
pub fn convert_varargs_to_stdarg(tree: &mut WorkingTree) -> Result<()> {
    let mut converted = Converted::new();

    for name in tree.top_level_files("c")? {
        let is_error_c = name == "error.c";
        tree.rewrite_file(&name, |src| convert_source(src, is_error_c, &mut converted))?;
    }

    for header in ["intern.h", "ruby.h"] {
        tree.rewrite_file(header, |src| Some(rewrite_header(src, &converted)))?;
    }
    Ok(())
}

fn convert_source(src: &[u8], is_error_c: bool, converted: &mut Converted) -> Option<Vec<u8>> {
    if STDARG_INCLUDE.is_match(src) || !VARARGS_INCLUDE.is_match(src) {
        return None;
    }

    let switched = VARARGS_INCLUDE.replace_all(src, NoExpand(STDARG_SWITCH));
    let mut out = KR_DEFINITION
        .replace_all(&switched, |caps: &Captures| {
            let (func, decl, body) = convert_definition(caps);
            let replacement = bytes::join(&[&decl, b"\n", &body]);
            converted.insert(func, decl);
            replacement
        })
        .into_owned();

    if is_error_c {
        out = TYPE_ERROR_DECL
            .replace_all(&out, NoExpand(b"/* extern void TypeError(); */"))
            .into_owned();
        out = ARG_ERROR_DECL
            .replace_all(&out, NoExpand(b"/* void ArgError(); */"))
            .into_owned();
        out = bytes::replace_all(&out, b"va_start(args);", b"va_start(args, fmt);");
    }

    Some(
        GNUC_STATIC_VOIDFN
            .replace_all(&out, NoExpand(b"#if 0\nstatic volatile voidfn"))
            .into_owned(),
    )
}

/// Returns (function name, stdarg declaration, rewritten body)
fn convert_definition(caps: &Captures) -> (Vec<u8>, Vec<u8>, Vec<u8>) {
    let func = &caps[1];

    let mut declared: HashMap<Vec<u8>, Vec<u8>> = HashMap::new();
    for line in caps[3].split_inclusive(|&b| b == b'\n') {
        let line = DECL_TRIM.replace_all(line, NoExpand(b""));
        if let Some(name) = IDENT.find_iter(&line).last() {
            declared.insert(name.as_bytes().to_vec(), line.to_vec());
        }
    }

    let typed_args = IDENT.replace_all(&caps[2], |arg: &Captures| {
        declared
            .get(&arg[0])
            .cloned()
            .unwrap_or_else(|| bytes::join(&[b"int ", &arg[0]]))
    });

    let decl = bytes::join(&[func, b"(", &typed_args, b", ...)"]);
    let last_arg = IDENT
        .find_iter(&decl)
        .last()
        .map(|m| m.as_bytes().to_vec())
        .unwrap_or_default();

    let body = VA_START.replace_all(&caps[5], |start: &Captures| {
        bytes::join(&[b"va_init_list(", &start[1], b", ", &last_arg, b")"])
    });

    (func.to_vec(), decl, body.into_owned())
}

fn rewrite_header(src: &[u8], converted: &Converted) -> Vec<u8> {
    let mut out = src.to_vec();
    for (func, decl) in converted {
        let old = bytes::join(&[b" ", func, b"();"]);
        let new = bytes::join(&[b" ", decl, b";"]);
        out = bytes::replace_all(&out, &old, &new);
    }
    out = GNUC_TYPEDEF_VOIDFN
        .replace_all(&out, NoExpand(b"#if 0\ntypedef void voidfn"))
        .into_owned();
    GNUC_VOLATILE_VOIDFN
        .replace_all(&out, NoExpand(b"#if 0\nvolatile voidfn"))
        .into_owned()
}
