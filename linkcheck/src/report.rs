/// Report module for the LinkCheck service
///
/// Renders stored batches as an A4 PDF: a title, then one section per batch
/// listing every URL with its short status.
use crate::model::{LinksNum, LinksSet};
use printpdf::{BuiltinFont, IndirectFontRef, Mm, PdfDocument};
use std::collections::BTreeMap;
use thiserror::Error;

const REPORT_TITLE: &str = "Link Status Report";

const PAGE_WIDTH: f32 = 210.0;
const PAGE_HEIGHT: f32 = 297.0;
const MARGIN: f32 = 10.0;

// Characters per body line at 11pt before wrapping.
const MAX_LINE_CHARS: usize = 95;

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("failed to render PDF report: {0}")]
    Pdf(String),
}

/// One laid-out piece of the report.
#[derive(Debug, Clone, PartialEq)]
enum Block {
    Title(String),
    Heading(String),
    Entry(String),
    SetEnd,
}

impl Block {
    /// Vertical space taken by the block, in millimetres.
    fn advance(&self) -> f32 {
        match self {
            Block::Title(_) => 12.0,
            Block::Heading(_) => 8.0,
            Block::Entry(_) => 7.0,
            Block::SetEnd => 5.0,
        }
    }

    fn font_size(&self) -> f32 {
        match self {
            Block::Title(_) => 16.0,
            Block::Heading(_) => 14.0,
            Block::Entry(_) | Block::SetEnd => 11.0,
        }
    }

    fn text(&self) -> Option<&str> {
        match self {
            Block::Title(text) | Block::Heading(text) | Block::Entry(text) => Some(text),
            Block::SetEnd => None,
        }
    }
}

/// A block with the baseline it is drawn at.
#[derive(Debug, Clone, PartialEq)]
struct Placed {
    block: Block,
    baseline: f32,
}

fn layout(links_sets: &BTreeMap<LinksNum, LinksSet>) -> Vec<Block> {
    let mut blocks = vec![Block::Title(REPORT_TITLE.to_string())];

    for (links_num, set) in links_sets {
        blocks.push(Block::Heading(format!("Links Set #{}", links_num)));
        for (url, status) in &set.links {
            let line: Vec<char> = format!("{} - {}", status.short(), url).chars().collect();
            for chunk in line.chunks(MAX_LINE_CHARS) {
                blocks.push(Block::Entry(chunk.iter().collect()));
            }
        }
        blocks.push(Block::SetEnd);
    }

    blocks
}

/// Splits blocks into pages, starting a new page when the next block would
/// cross the bottom margin.
fn paginate(blocks: Vec<Block>) -> Vec<Vec<Placed>> {
    let mut pages = vec![Vec::new()];
    let mut y = PAGE_HEIGHT - MARGIN;

    for block in blocks {
        let advance = block.advance();
        if y - advance < MARGIN {
            pages.push(Vec::new());
            y = PAGE_HEIGHT - MARGIN;
        }

        let baseline = y - advance * 0.75;
        y -= advance;
        if let Some(page) = pages.last_mut() {
            page.push(Placed { block, baseline });
        }
    }

    pages
}

fn pdf_error<E: std::fmt::Debug>(e: E) -> ReportError {
    ReportError::Pdf(format!("{:?}", e))
}

/// Renders batches as a PDF document.
///
/// Batches appear in ascending order, and so do the URLs within each batch.
pub fn render(links_sets: &BTreeMap<LinksNum, LinksSet>) -> Result<Vec<u8>, ReportError> {
    let pages = paginate(layout(links_sets));

    let (doc, first_page, first_layer) =
        PdfDocument::new(REPORT_TITLE, Mm(PAGE_WIDTH), Mm(PAGE_HEIGHT), "Layer 1");
    let regular = doc
        .add_builtin_font(BuiltinFont::Helvetica)
        .map_err(pdf_error)?;
    let bold = doc
        .add_builtin_font(BuiltinFont::HelveticaBold)
        .map_err(pdf_error)?;

    for (i, page) in pages.iter().enumerate() {
        let layer = if i == 0 {
            doc.get_page(first_page).get_layer(first_layer)
        } else {
            let (page_index, layer_index) =
                doc.add_page(Mm(PAGE_WIDTH), Mm(PAGE_HEIGHT), "Layer 1");
            doc.get_page(page_index).get_layer(layer_index)
        };

        for placed in page {
            let Some(text) = placed.block.text() else {
                continue;
            };
            let font: &IndirectFontRef = match placed.block {
                Block::Entry(_) => &regular,
                _ => &bold,
            };
            layer.use_text(
                text,
                placed.block.font_size(),
                Mm(MARGIN),
                Mm(placed.baseline),
                font,
            );
        }
    }

    doc.save_to_bytes().map_err(pdf_error)
}

/// Attachment name for a report over `links_nums`, in request order.
pub fn file_name(links_nums: &[LinksNum]) -> String {
    let ids: Vec<String> = links_nums.iter().map(|n| n.to_string()).collect();
    format!("report_{}.pdf", ids.join("_"))
}
