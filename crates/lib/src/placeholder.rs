//! Placeholder parsing and substitution for step templates.
//!
//! Pipeline steps are written once and expanded per configuration entry. The
//! values that differ between entries (identifier, platform, flags, build
//! directory) and the run-wide variables (debug flags, toolchain version, ...)
//! are referenced through placeholders and substituted right before a step
//! is handed to the command runner.
//!
//! # Placeholder Formats
//!
//! - `$${config}` - identifier of the current configuration entry
//! - `$${platform}` - platform name of the current entry
//! - `$${flags}` - extra flags of the current entry, space separated
//! - `$${build_dir}` / `$${install_dir}` - the entry's isolated directories
//! - `$${workdir}` - the run's working directory
//! - `$${toggle:NAME}` - `yes` or `no` for a boolean toggle of the entry
//! - `$${var:NAME}` - a run variable
//!
//! # Shell Variables
//!
//! Single `$` characters pass through unchanged, so shell variables like
//! `$HOME` and `$PATH` work naturally without any escaping.
//!
//! # Escaping
//!
//! Use `$$$` before `{` to produce a literal `$${` sequence.
//!
//! # Example
//!
//! ```
//! use phasegraph_lib::placeholder::{parse, Placeholder, Segment};
//!
//! let segments = parse("$${build_dir}/bin:$PATH").unwrap();
//! assert_eq!(segments, vec![
//!     Segment::Placeholder(Placeholder::BuildDir),
//!     Segment::Literal("/bin:$PATH".to_string()),
//! ]);
//! ```

use thiserror::Error;

/// A parsed placeholder reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Placeholder {
  /// `$${config}`
  Config,
  /// `$${platform}`
  Platform,
  /// `$${flags}`
  Flags,
  /// `$${build_dir}`
  BuildDir,
  /// `$${install_dir}`
  InstallDir,
  /// `$${workdir}`
  Workdir,
  /// `$${toggle:NAME}`
  Toggle(String),
  /// `$${var:NAME}`
  Var(String),
}

/// A segment of parsed text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
  /// Literal text (no placeholders)
  Literal(String),

  /// A placeholder to be resolved
  Placeholder(Placeholder),
}

/// Errors that can occur during placeholder parsing or resolution.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlaceholderError {
  #[error("unclosed placeholder at position {0}")]
  Unclosed(usize),

  #[error("unknown placeholder: {0}")]
  Unknown(String),

  #[error("malformed placeholder: {0}")]
  Malformed(String),

  #[error("placeholder {0} needs a configuration entry but the target is sequential")]
  NoEntry(String),

  #[error("unresolved variable: {0}")]
  UnresolvedVar(String),
}

/// Resolves placeholder values at expansion time.
pub trait Resolver {
  fn resolve(&self, placeholder: &Placeholder) -> Result<String, PlaceholderError>;
}

/// Parse a string containing placeholders into segments.
///
/// # Errors
///
/// Returns an error if a placeholder is unclosed or names an unknown kind.
pub fn parse(input: &str) -> Result<Vec<Segment>, PlaceholderError> {
  let mut segments = Vec::new();
  let mut literal = String::new();
  let mut chars = input.char_indices().peekable();

  while let Some((pos, ch)) = chars.next() {
    if ch != '$' {
      literal.push(ch);
      continue;
    }

    // A lone `$` is a shell variable and passes through.
    if !matches!(chars.peek(), Some((_, '$'))) {
      literal.push('$');
      continue;
    }
    chars.next();

    match chars.peek() {
      Some((_, '$')) => {
        chars.next();
        if matches!(chars.peek(), Some((_, '{'))) {
          chars.next();
          literal.push_str("$${");
        } else {
          literal.push_str("$$$");
        }
      }
      Some((_, '{')) => {
        chars.next();

        if !literal.is_empty() {
          segments.push(Segment::Literal(std::mem::take(&mut literal)));
        }

        let mut content = String::new();
        let mut closed = false;
        for (_, c) in chars.by_ref() {
          if c == '}' {
            closed = true;
            break;
          }
          content.push(c);
        }

        if !closed {
          return Err(PlaceholderError::Unclosed(pos));
        }

        segments.push(Segment::Placeholder(parse_content(&content)?));
      }
      _ => literal.push_str("$$"),
    }
  }

  if !literal.is_empty() {
    segments.push(Segment::Literal(literal));
  }

  Ok(segments)
}

fn parse_content(content: &str) -> Result<Placeholder, PlaceholderError> {
  let (kind, arg) = match content.split_once(':') {
    Some((kind, arg)) => (kind, Some(arg)),
    None => (content, None),
  };

  match (kind, arg) {
    ("config", None) => Ok(Placeholder::Config),
    ("platform", None) => Ok(Placeholder::Platform),
    ("flags", None) => Ok(Placeholder::Flags),
    ("build_dir", None) => Ok(Placeholder::BuildDir),
    ("install_dir", None) => Ok(Placeholder::InstallDir),
    ("workdir", None) => Ok(Placeholder::Workdir),
    ("toggle" | "var", Some("")) | ("toggle" | "var", None) => Err(PlaceholderError::Malformed(content.to_string())),
    ("toggle", Some(name)) => Ok(Placeholder::Toggle(name.to_string())),
    ("var", Some(name)) => Ok(Placeholder::Var(name.to_string())),
    _ => Err(PlaceholderError::Unknown(content.to_string())),
  }
}

/// Parse and substitute every placeholder in `input`.
pub fn substitute(input: &str, resolver: &impl Resolver) -> Result<String, PlaceholderError> {
  let mut out = String::with_capacity(input.len());
  for segment in parse(input)? {
    match segment {
      Segment::Literal(text) => out.push_str(&text),
      Segment::Placeholder(p) => out.push_str(&resolver.resolve(&p)?),
    }
  }
  Ok(out)
}

/// Expand one argv element.
///
/// An element that is exactly one placeholder expands to zero or more
/// arguments (its value split on whitespace), so `$${flags}` contributes each
/// flag as its own argument and an empty `$${var:debug_flags}` disappears.
/// Any other element substitutes to exactly one argument.
pub fn expand_arg(input: &str, resolver: &impl Resolver) -> Result<Vec<String>, PlaceholderError> {
  let segments = parse(input)?;
  if let [Segment::Placeholder(p)] = segments.as_slice() {
    let value = resolver.resolve(p)?;
    return Ok(value.split_whitespace().map(str::to_string).collect());
  }

  let mut out = String::with_capacity(input.len());
  for segment in segments {
    match segment {
      Segment::Literal(text) => out.push_str(&text),
      Segment::Placeholder(p) => out.push_str(&resolver.resolve(&p)?),
    }
  }
  Ok(vec![out])
}
