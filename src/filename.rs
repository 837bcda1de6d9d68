//! Output file naming: a small `{placeholder}` template and filename sanitization.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

pub const DEFAULT_TEMPLATE: &str = "{cid}_{song_name}{suffix}";

const INVALID_CHARS: [char; 9] = ['\\', '/', ':', '*', '?', '"', '<', '>', '|'];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TemplateError {
    #[error("unknown placeholder {{{0}}}")]
    UnknownPlaceholder(String),

    #[error("unmatched '{0}' at byte {1}")]
    UnmatchedBrace(char, usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Cid,
    SongName,
    Suffix,
    OriginalFileName,
}

impl FromStr for Field {
    type Err = TemplateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cid" => Ok(Field::Cid),
            "song_name" => Ok(Field::SongName),
            "suffix" => Ok(Field::Suffix),
            "original_file_name" => Ok(Field::OriginalFileName),
            _ => Err(TemplateError::UnknownPlaceholder(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Piece {
    Literal(String),
    Field(Field),
}

/// Values substituted into a [`FileNameTemplate`].
#[derive(Debug, Clone, Copy)]
pub struct FileNameFields<'a> {
    pub cid: &'a str,
    pub song_name: &'a str,
    pub suffix: &'a str,
    pub original_file_name: &'a str,
}

/// A parsed file name template such as `{cid}_{song_name}{suffix}`.
///
/// `{{` and `}}` stand for literal braces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileNameTemplate {
    source: String,
    pieces: Vec<Piece>,
}

impl FileNameTemplate {
    pub fn parse(template: &str) -> Result<Self, TemplateError> {
        let mut pieces = Vec::new();
        let mut literal = String::new();
        let mut chars = template.char_indices().peekable();

        while let Some((pos, c)) = chars.next() {
            match c {
                '{' if chars.next_if(|&(_, c)| c == '{').is_some() => literal.push('{'),
                '}' if chars.next_if(|&(_, c)| c == '}').is_some() => literal.push('}'),
                '{' => {
                    let mut name = String::new();
                    loop {
                        match chars.next() {
                            Some((_, '}')) => break,
                            Some((_, '{')) | None => {
                                return Err(TemplateError::UnmatchedBrace('{', pos))
                            }
                            Some((_, c)) => name.push(c),
                        }
                    }
                    let field = name.parse()?;
                    if !literal.is_empty() {
                        pieces.push(Piece::Literal(std::mem::take(&mut literal)));
                    }
                    pieces.push(Piece::Field(field));
                }
                '}' => return Err(TemplateError::UnmatchedBrace('}', pos)),
                c => literal.push(c),
            }
        }
        if !literal.is_empty() {
            pieces.push(Piece::Literal(literal));
        }

        Ok(Self {
            source: template.to_string(),
            pieces,
        })
    }

    /// Renders the template. The result is not sanitized.
    pub fn render(&self, fields: &FileNameFields<'_>) -> String {
        self.pieces
            .iter()
            .map(|piece| match piece {
                Piece::Literal(s) => s.as_str(),
                Piece::Field(Field::Cid) => fields.cid,
                Piece::Field(Field::SongName) => fields.song_name,
                Piece::Field(Field::Suffix) => fields.suffix,
                Piece::Field(Field::OriginalFileName) => fields.original_file_name,
            })
            .collect()
    }
}

impl Default for FileNameTemplate {
    fn default() -> Self {
        Self {
            source: DEFAULT_TEMPLATE.to_string(),
            pieces: vec![
                Piece::Field(Field::Cid),
                Piece::Literal("_".to_string()),
                Piece::Field(Field::SongName),
                Piece::Field(Field::Suffix),
            ],
        }
    }
}

impl FromStr for FileNameTemplate {
    type Err = TemplateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for FileNameTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// Replaces characters that are not allowed in file names with `_`.
pub fn sanitize_filename(name: &str) -> String {
    name.chars()
        .map(|c| if INVALID_CHARS.contains(&c) { '_' } else { c })
        .collect()
}
