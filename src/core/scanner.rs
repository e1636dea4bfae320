//! Clarity Signature Scanner
//!
//! Lexical pass of the pattern analyzer. Parses Clarity source into
//! s-expressions and checks each function definition against the fixed
//! signature catalog. Best-effort: unbalanced input is closed at EOF and
//! scanned anyway, it never fails.

use std::collections::HashSet;
use tracing::debug;

use crate::models::{FindingSource, Signature, Threat};

// ============================================
// S-expression parsing
// ============================================

#[derive(Debug, Clone, PartialEq, Eq)]
enum Expr {
    Atom(String),
    Str(String),
    List(Vec<Expr>),
}

impl Expr {
    /// Name of the called function if this is `(name ...)`
    fn head(&self) -> Option<&str> {
        match self {
            Expr::List(items) => match items.first() {
                Some(Expr::Atom(a)) => Some(a.as_str()),
                _ => None,
            },
            _ => None,
        }
    }

    fn args(&self) -> &[Expr] {
        match self {
            Expr::List(items) if !items.is_empty() => &items[1..],
            _ => &[],
        }
    }

    fn is_atom(&self, name: &str) -> bool {
        matches!(self, Expr::Atom(a) if a == name)
    }

    /// True if any atom in this subtree equals one of `names`
    fn mentions(&self, names: &[&str]) -> bool {
        match self {
            Expr::Atom(a) => names.contains(&a.as_str()),
            Expr::Str(_) => false,
            Expr::List(items) => items.iter().any(|e| e.mentions(names)),
        }
    }

    /// Pre-order visit of every list in this subtree
    fn for_each_call<'a>(&'a self, f: &mut impl FnMut(&'a Expr)) {
        if let Expr::List(items) = self {
            f(self);
            for item in items {
                item.for_each_call(f);
            }
        }
    }
}

/// Lists nested deeper than this are flattened into their parent
const MAX_NESTING: usize = 128;

/// Parse result with a count of structural problems that were repaired
struct Parsed {
    forms: Vec<Expr>,
    repaired: usize,
}

fn parse(source: &str) -> Parsed {
    let mut stack: Vec<Vec<Expr>> = vec![Vec::new()];
    let mut repaired = 0;
    // Open delimiters past MAX_NESTING that were not given their own list
    let mut flattened = 0usize;
    let mut chars = source.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            ';' => {
                for next in chars.by_ref() {
                    if next == '\n' {
                        break;
                    }
                }
            }
            '(' | '{' => {
                if stack.len() > MAX_NESTING {
                    flattened += 1;
                    repaired += 1;
                } else {
                    stack.push(Vec::new());
                }
            }
            ')' | '}' => {
                if flattened > 0 {
                    flattened -= 1;
                } else if stack.len() > 1 {
                    let items = stack.pop().unwrap_or_default();
                    if let Some(parent) = stack.last_mut() {
                        parent.push(Expr::List(items));
                    }
                } else {
                    repaired += 1;
                }
            }
            '"' => {
                let text = read_string(&mut chars);
                if let Some(top) = stack.last_mut() {
                    top.push(Expr::Str(text));
                }
            }
            'u' if chars.peek() == Some(&'"') => {
                chars.next();
                let text = read_string(&mut chars);
                if let Some(top) = stack.last_mut() {
                    top.push(Expr::Str(text));
                }
            }
            c if c.is_whitespace() || c == ',' => {}
            c => {
                let mut atom = String::from(c);
                while let Some(&next) = chars.peek() {
                    if next.is_whitespace() || "(){}\",;".contains(next) {
                        break;
                    }
                    atom.push(next);
                    chars.next();
                }
                if let Some(top) = stack.last_mut() {
                    top.push(Expr::Atom(atom));
                }
            }
        }
    }

    // Close anything left open
    while stack.len() > 1 {
        repaired += 1;
        let items = stack.pop().unwrap_or_default();
        if let Some(parent) = stack.last_mut() {
            parent.push(Expr::List(items));
        }
    }

    Parsed {
        forms: stack.pop().unwrap_or_default(),
        repaired,
    }
}

fn read_string(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) -> String {
    let mut text = String::new();
    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                if let Some(escaped) = chars.next() {
                    text.push(escaped);
                }
            }
            '"' => break,
            c => text.push(c),
        }
    }
    text
}

// ============================================
// Function definitions
// ============================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FnKind {
    Public,
    Private,
    ReadOnly,
}

struct FnDef<'a> {
    name: &'a str,
    kind: FnKind,
    body: &'a [Expr],
}

fn function_defs(forms: &[Expr]) -> Vec<FnDef<'_>> {
    forms
        .iter()
        .filter_map(|form| {
            let kind = match form.head()? {
                "define-public" => FnKind::Public,
                "define-private" => FnKind::Private,
                "define-read-only" => FnKind::ReadOnly,
                _ => return None,
            };
            let args = form.args();
            let name = match args.first()? {
                Expr::List(sig) => match sig.first()? {
                    Expr::Atom(n) => n.as_str(),
                    _ => return None,
                },
                Expr::Atom(n) => n.as_str(),
                Expr::Str(_) => return None,
            };
            Some(FnDef {
                name,
                kind,
                body: &args[1..],
            })
        })
        .collect()
}

// ============================================
// Pattern vocabulary
// ============================================

const CALLER_ATOMS: &[&str] = &["tx-sender", "contract-caller"];
const MINT_BURN: &[&str] = &["ft-mint?", "nft-mint?", "ft-burn?", "nft-burn?"];
const TRANSFERS: &[&str] = &["stx-transfer?", "ft-transfer?", "nft-transfer?", "stx-burn?"];
const MAP_WRITES: &[&str] = &["map-set", "map-insert", "map-delete"];
const STATE_WRITES: &[&str] = &["var-set", "map-set", "map-insert", "map-delete"];
const COMPARISONS: &[&str] = &[">", "<", ">=", "<="];
const FORCE_UNWRAPS: &[&str] = &["unwrap-panic", "unwrap-err-panic"];

/// Index of the sender argument for calls that move value out of an account
fn sender_arg(call: &str) -> Option<usize> {
    match call {
        "stx-transfer?" => Some(1),
        "stx-burn?" => Some(1),
        "ft-transfer?" | "nft-transfer?" => Some(2),
        "ft-burn?" | "nft-burn?" => Some(2),
        _ => None,
    }
}

/// `asserts!`/`if` whose condition checks the caller
fn is_caller_check(expr: &Expr) -> bool {
    matches!(expr.head(), Some("asserts!") | Some("if"))
        && expr.args().first().is_some_and(|cond| cond.mentions(CALLER_ATOMS))
}

/// Walk `body` noting whether it contains a caller check or calls a guard
fn has_guard(body: &[Expr], guards: &HashSet<&str>) -> bool {
    let mut found = false;
    for expr in body {
        expr.for_each_call(&mut |call| {
            if is_caller_check(call) || call.head().is_some_and(|h| guards.contains(h)) {
                found = true;
            }
        });
    }
    found
}

/// Every call in `body`, tagged with whether it sits inside `as-contract`
fn collect_calls<'a>(body: &'a [Expr], in_as_contract: bool, out: &mut Vec<(&'a Expr, bool)>) {
    for expr in body {
        if let Expr::List(items) = expr {
            let inner = in_as_contract || expr.head() == Some("as-contract");
            out.push((expr, in_as_contract));
            collect_calls(items, inner, out);
        }
    }
}

/// A value-moving call is self-authorizing when it spends the caller's own
/// balance (or writes the caller's own map key) outside of `as-contract`.
fn is_self_authorizing(call: &Expr, in_as_contract: bool) -> bool {
    if in_as_contract {
        return false;
    }
    match call.head() {
        Some(h) if MAP_WRITES.contains(&h) => {
            call.args().get(1).is_some_and(|key| key.mentions(&["tx-sender"]))
        }
        Some(h) => sender_arg(h)
            .and_then(|i| call.args().get(i))
            .is_some_and(|sender| sender.is_atom("tx-sender")),
        None => false,
    }
}

/// `contract-call?` whose response is discarded or force-unwrapped
fn unhandled_calls(expr: &Expr, parent: Option<&str>, discarded: bool, found: &mut bool) {
    let Expr::List(items) = expr else { return };
    let head = expr.head();

    if head == Some("contract-call?") {
        let forced = parent.is_some_and(|p| FORCE_UNWRAPS.contains(&p));
        if forced || discarded {
            *found = true;
        }
    }

    match head {
        Some("begin") => {
            let args = expr.args();
            for (i, arg) in args.iter().enumerate() {
                unhandled_calls(arg, head, i + 1 < args.len(), found);
            }
        }
        Some("let") => {
            let args = expr.args();
            if let Some(bindings) = args.first() {
                unhandled_calls(bindings, head, false, found);
            }
            let body = args.get(1..).unwrap_or_default();
            for (i, arg) in body.iter().enumerate() {
                unhandled_calls(arg, head, i + 1 < body.len(), found);
            }
        }
        // Transparent wrapper
        Some("as-contract") => {
            for arg in expr.args() {
                unhandled_calls(arg, parent, discarded, found);
            }
        }
        _ => {
            for item in items {
                unhandled_calls(item, head, false, found);
            }
        }
    }
}

/// External call appearing before a state write in evaluation order
fn call_before_write(body: &[Expr]) -> bool {
    let mut seen_call = false;
    let mut flagged = false;
    for expr in body {
        expr.for_each_call(&mut |call| match call.head() {
            Some("contract-call?") => seen_call = true,
            Some(h) if seen_call && STATE_WRITES.contains(&h) => flagged = true,
            _ => {}
        });
    }
    flagged
}

// ============================================
// Scanner
// ============================================

/// Result of a lexical scan
#[derive(Debug, Clone, Default)]
pub struct ScanReport {
    /// One threat per matched signature, catalog order, with locations
    pub findings: Vec<Threat>,
    /// Number of function definitions examined
    pub functions_scanned: usize,
    /// Unbalanced delimiters repaired during parsing
    pub repaired_delimiters: usize,
}

impl ScanReport {
    pub fn has(&self, signature: Signature) -> bool {
        self.findings.iter().any(|t| t.signature == Some(signature))
    }

    fn record(&mut self, signature: Signature, location: &str) {
        match self
            .findings
            .iter_mut()
            .find(|t| t.signature == Some(signature))
        {
            Some(threat) => {
                if !threat.locations.iter().any(|l| l == location) {
                    threat.locations.push(location.to_string());
                }
            }
            None => {
                let mut threat = Threat::from_signature(signature, FindingSource::Lexical);
                threat.locations.push(location.to_string());
                self.findings.push(threat);
            }
        }
    }
}

/// Scan Clarity source against the signature catalog
pub fn scan(source: &str) -> ScanReport {
    let parsed = parse(source);
    let defs = function_defs(&parsed.forms);

    let mut report = ScanReport {
        findings: Vec::new(),
        functions_scanned: defs.len(),
        repaired_delimiters: parsed.repaired,
    };

    // Private/read-only helpers that assert on the caller count as guards
    let guards: HashSet<&str> = defs
        .iter()
        .filter(|d| d.kind != FnKind::Public && has_guard(d.body, &HashSet::new()))
        .map(|d| d.name)
        .collect();

    for def in &defs {
        if def.kind == FnKind::ReadOnly {
            continue;
        }
        let guarded = has_guard(def.body, &guards);
        let mut calls = Vec::new();
        collect_calls(def.body, false, &mut calls);

        if def.kind == FnKind::Public && !guarded {
            if calls.iter().any(|(c, _)| c.head() == Some("as-contract")) {
                report.record(Signature::SelfImpersonation, def.name);
            }

            let unauthorized_mint = calls.iter().any(|(c, in_ac)| {
                c.head().is_some_and(|h| MINT_BURN.contains(&h))
                    && !(c.head().is_some_and(|h| h.ends_with("burn?")) && is_self_authorizing(c, *in_ac))
            });
            if unauthorized_mint {
                report.record(Signature::UnauthorizedMintBurn, def.name);
            }

            let unguarded_write = calls.iter().any(|(c, in_ac)| {
                c.head()
                    .is_some_and(|h| TRANSFERS.contains(&h) || STATE_WRITES.contains(&h))
                    && !is_self_authorizing(c, *in_ac)
            });
            if unguarded_write {
                report.record(Signature::MissingAccessControl, def.name);
            }
        }

        if def.kind == FnKind::Public && call_before_write(def.body) {
            report.record(Signature::Reentrancy, def.name);
        }

        let has_arithmetic = calls
            .iter()
            .any(|(c, _)| matches!(c.head(), Some("-") | Some("*")));
        let has_bounds = calls
            .iter()
            .any(|(c, _)| c.head().is_some_and(|h| COMPARISONS.contains(&h)));
        if has_arithmetic && !has_bounds {
            report.record(Signature::UncheckedArithmetic, def.name);
        }

        let mut unhandled = false;
        for (i, expr) in def.body.iter().enumerate() {
            unhandled_calls(expr, None, i + 1 < def.body.len(), &mut unhandled);
        }
        if unhandled {
            report.record(Signature::UnhandledCallError, def.name);
        }
    }

    report
        .findings
        .sort_by_key(|t| t.signature.map(|s| s as usize).unwrap_or(usize::MAX));

    debug!(
        functions = report.functions_scanned,
        findings = report.findings.len(),
        repaired = report.repaired_delimiters,
        "🔎 Lexical scan complete"
    );
    report
}

/// Map free-text threat names (e.g. from the oracle) onto the catalog
pub fn classify_threat(text: &str) -> Option<Signature> {
    let t = text.to_lowercase();
    let has = |needles: &[&str]| needles.iter().any(|n| t.contains(n));

    if has(&["as-contract", "impersonat"]) {
        Some(Signature::SelfImpersonation)
    } else if has(&["mint", "burn"]) {
        Some(Signature::UnauthorizedMintBurn)
    } else if has(&["reentran", "re-entran"]) {
        Some(Signature::Reentrancy)
    } else if has(&["arithmetic", "overflow", "underflow"]) {
        Some(Signature::UncheckedArithmetic)
    } else if has(&["error handling", "unhandled", "unwrap", "contract-call", "call error"]) {
        Some(Signature::UnhandledCallError)
    } else if has(&["access control", "authoriz", "permission", "admin", "owner check"]) {
        Some(Signature::MissingAccessControl)
    } else {
        None
    }
}
