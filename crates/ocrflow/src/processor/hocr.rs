//! Layout capture from Tesseract hOCR output.

use std::sync::LazyLock;

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::ProcessError;

static RE_BBOX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"bbox (\d+) (\d+) (\d+) (\d+)").unwrap());
static RE_WCONF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"x_wconf (\d+(?:\.\d+)?)").unwrap());

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x0: u32,
    pub y0: u32,
    pub x1: u32,
    pub y1: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Word {
    pub text: String,
    pub confidence: f64,
    pub bbox: BoundingBox,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Line {
    pub text: String,
    pub bbox: BoundingBox,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub text: String,
    pub bbox: BoundingBox,
}

/// Positional structure of recognized text.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Layout {
    pub words: Vec<Word>,
    pub lines: Vec<Line>,
    pub blocks: Vec<Block>,
}

impl Layout {
    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Node {
    Block,
    Line,
    Word,
    Other,
}

fn classify(class: &str) -> Node {
    // An element can carry several classes; the first known one wins.
    for name in class.split_whitespace() {
        match name {
            "ocr_carea" => return Node::Block,
            "ocr_line" | "ocr_textfloat" | "ocr_header" | "ocr_caption" => return Node::Line,
            "ocrx_word" => return Node::Word,
            _ => {}
        }
    }
    Node::Other
}

struct Attrs {
    class: String,
    title: String,
}

fn read_attrs(e: &BytesStart<'_>) -> Attrs {
    let mut attrs = Attrs {
        class: String::new(),
        title: String::new(),
    };
    for attr in e.attributes().flatten() {
        match attr.key.as_ref() {
            b"class" => attrs.class = String::from_utf8_lossy(&attr.value).into_owned(),
            b"title" => attrs.title = String::from_utf8_lossy(&attr.value).into_owned(),
            _ => {}
        }
    }
    attrs
}

fn parse_bbox(title: &str) -> BoundingBox {
    RE_BBOX
        .captures(title)
        .map(|c| {
            let n = |i: usize| c[i].parse::<u32>().unwrap_or(0);
            BoundingBox {
                x0: n(1),
                y0: n(2),
                x1: n(3),
                y1: n(4),
            }
        })
        .unwrap_or_default()
}

fn parse_confidence(title: &str) -> f64 {
    RE_WCONF
        .captures(title)
        .and_then(|c| c[1].parse::<f64>().ok())
        .map(|c| c.clamp(0.0, 100.0))
        .unwrap_or(0.0)
}

fn append(target: &mut String, text: &str, separator: char) {
    if text.is_empty() {
        return;
    }
    if !target.is_empty() {
        target.push(separator);
    }
    target.push_str(text);
}

/// Parses hOCR markup into words, lines and blocks.
pub fn parse_hocr(hocr: &str) -> Result<Layout, ProcessError> {
    let mut reader = Reader::from_str(hocr);
    reader.config_mut().trim_text(true);

    let mut layout = Layout::default();
    let mut stack: Vec<Node> = Vec::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) => {
                let attrs = read_attrs(e);
                let node = classify(&attrs.class);
                match node {
                    Node::Block => layout.blocks.push(Block {
                        text: String::new(),
                        bbox: parse_bbox(&attrs.title),
                    }),
                    Node::Line => layout.lines.push(Line {
                        text: String::new(),
                        bbox: parse_bbox(&attrs.title),
                    }),
                    Node::Word => layout.words.push(Word {
                        text: String::new(),
                        confidence: parse_confidence(&attrs.title),
                        bbox: parse_bbox(&attrs.title),
                    }),
                    Node::Other => {}
                }
                stack.push(node);
            }
            Ok(Event::Text(e)) => {
                if stack.contains(&Node::Word) {
                    if let Some(word) = layout.words.last_mut() {
                        let decoded = e.unescape().unwrap_or_default();
                        word.text.push_str(&decoded);
                    }
                }
            }
            Ok(Event::End(_)) => match stack.pop() {
                Some(Node::Word) => {
                    let text = layout
                        .words
                        .last()
                        .map(|w| w.text.trim().to_string())
                        .unwrap_or_default();
                    if text.is_empty() {
                        layout.words.pop();
                    } else if stack.contains(&Node::Line) {
                        if let Some(line) = layout.lines.last_mut() {
                            append(&mut line.text, &text, ' ');
                        }
                    }
                }
                Some(Node::Line) => {
                    let text = layout
                        .lines
                        .last()
                        .map(|l| l.text.clone())
                        .unwrap_or_default();
                    if text.is_empty() {
                        layout.lines.pop();
                    } else if stack.contains(&Node::Block) {
                        if let Some(block) = layout.blocks.last_mut() {
                            append(&mut block.text, &text, '\n');
                        }
                    }
                }
                Some(Node::Block) => {
                    if layout.blocks.last().is_some_and(|b| b.text.is_empty()) {
                        layout.blocks.pop();
                    }
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(ProcessError::OcrFailed(format!(
                    "hOCR parsing error: {}",
                    e
                )));
            }
            _ => {}
        }
    }

    Ok(layout)
}
