// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Word geometry — scale normalisation, column assignment, ghost-block
// filtering, and reading-order sort.

use lesewerk_core::{ColumnSplit, RecognizedWord, WordHit};
use tracing::{debug, instrument};

/// Words whose tops differ by no more than this (page-local units) share a
/// line.
const LINE_TOLERANCE: f32 = 5.0;

/// A region wider than this fraction of the page is never text.
const GHOST_FULL_WIDTH: f32 = 0.9;

/// A region exceeding this fraction of both page width and height is never
/// text.
const GHOST_BLOCK: f32 = 0.5;

/// Maps raw recogniser hits on one prepared page to canonical words.
#[derive(Debug, Clone)]
pub struct WordGeometryMapper {
    columns: ColumnSplit,
    /// Width of the recognised raster, in working pixels.
    page_width: f32,
    /// Height of the recognised raster, in working pixels.
    page_height: f32,
    scale: f32,
}

impl WordGeometryMapper {
    /// `page_width`/`page_height` are the dimensions of the raster the hits
    /// were read from; `scale` is the render scale that produced it.
    pub fn new(columns: ColumnSplit, page_width: u32, page_height: u32, scale: f32) -> Self {
        Self {
            columns,
            page_width: page_width as f32,
            page_height: page_height as f32,
            scale,
        }
    }

    /// Drop ghost blocks, assign columns, unscale, and sort into reading
    /// order.
    #[instrument(skip_all, fields(hits = hits.len(), columns = self.columns.column_count()))]
    pub fn map(&self, hits: Vec<WordHit>) -> Vec<RecognizedWord> {
        let total = hits.len();
        let mut words: Vec<RecognizedWord> = hits
            .into_iter()
            .filter(|hit| !self.is_ghost(hit))
            .map(|hit| RecognizedWord {
                // Splits live in the same working space as the raw hits.
                column: self.columns.column_of(hit.bbox.center_x()),
                bbox: hit.bbox.unscaled(self.scale),
                text: hit.text,
                confidence: hit.confidence,
            })
            .collect();

        let ghosts = total - words.len();
        if ghosts > 0 {
            debug!(ghosts, "Discarded ghost blocks");
        }

        sort_reading_order(&mut words);
        words
    }

    fn is_ghost(&self, hit: &WordHit) -> bool {
        let width = hit.bbox.width() / self.page_width;
        let height = hit.bbox.height() / self.page_height;
        width > GHOST_FULL_WIDTH || (width > GHOST_BLOCK && height > GHOST_BLOCK)
    }
}

/// Sort words column-major, top-to-bottom, left-to-right.
///
/// Within a column, words are grouped into lines anchored on the topmost
/// word: every word whose top lies within the tolerance of the anchor joins
/// its line. Lines are then ordered by x.
pub fn sort_reading_order(words: &mut [RecognizedWord]) {
    words.sort_by(|a, b| {
        a.column
            .cmp(&b.column)
            .then_with(|| a.bbox.y0.total_cmp(&b.bbox.y0))
    });

    let mut start = 0;
    while start < words.len() {
        let anchor = &words[start];
        let (column, top) = (anchor.column, anchor.bbox.y0);
        let end = words[start..]
            .iter()
            .position(|w| w.column != column || w.bbox.y0 - top > LINE_TOLERANCE)
            .map_or(words.len(), |offset| start + offset);

        words[start..end].sort_by(|a, b| a.bbox.x0.total_cmp(&b.bbox.x0));
        start = end;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lesewerk_core::BoundingBox;

    fn hit(text: &str, x0: f32, y0: f32, x1: f32, y1: f32) -> WordHit {
        WordHit {
            text: text.into(),
            confidence: 0.9,
            bbox: BoundingBox::new(x0, y0, x1, y1),
        }
    }

    fn texts(words: &[RecognizedWord]) -> Vec<&str> {
        words.iter().map(|w| w.text.as_str()).collect()
    }

    #[test]
    fn bboxes_are_divided_by_scale() {
        let mapper = WordGeometryMapper::new(ColumnSplit::single_column(), 1000, 1400, 2.0);
        let words = mapper.map(vec![hit("alpha", 100.0, 200.0, 180.0, 230.0)]);
        assert_eq!(words[0].bbox, BoundingBox::new(50.0, 100.0, 90.0, 115.0));
        assert_eq!(words[0].column, 0);
    }

    #[test]
    fn same_page_at_two_scales_agrees() {
        let at = |scale: f32| {
            let mapper = WordGeometryMapper::new(
                ColumnSplit::new(vec![500.0 * scale]),
                (1000.0 * scale) as u32,
                (1400.0 * scale) as u32,
                scale,
            );
            mapper.map(vec![
                hit("left", 100.0 * scale, 50.0 * scale, 160.0 * scale, 62.0 * scale),
                hit("right", 600.0 * scale, 50.0 * scale, 660.0 * scale, 62.0 * scale),
            ])
        };
        let (two, three) = (at(2.0), at(3.0));
        assert_eq!(two.len(), three.len());
        for (a, b) in two.iter().zip(&three) {
            assert_eq!(a.column, b.column);
            assert!((a.bbox.x0 - b.bbox.x0).abs() < 0.01);
            assert!((a.bbox.y0 - b.bbox.y0).abs() < 0.01);
            assert!((a.bbox.x1 - b.bbox.x1).abs() < 0.01);
            assert!((a.bbox.y1 - b.bbox.y1).abs() < 0.01);
        }
    }

    #[test]
    fn columns_come_before_rows() {
        let mapper = WordGeometryMapper::new(ColumnSplit::new(vec![500.0]), 1000, 1400, 1.0);
        let words = mapper.map(vec![
            hit("right-top", 600.0, 10.0, 650.0, 20.0),
            hit("left-bottom", 100.0, 900.0, 150.0, 910.0),
            hit("left-top", 100.0, 10.0, 150.0, 20.0),
        ]);
        assert_eq!(texts(&words), ["left-top", "left-bottom", "right-top"]);
        assert_eq!(words[2].column, 1);
    }

    #[test]
    fn words_within_tolerance_sort_by_x() {
        let mapper = WordGeometryMapper::new(ColumnSplit::single_column(), 1000, 1400, 1.0);
        let words = mapper.map(vec![
            hit("c", 300.0, 100.0, 340.0, 112.0),
            hit("a", 100.0, 104.0, 140.0, 116.0),
            hit("b", 200.0, 102.0, 240.0, 114.0),
            hit("next", 50.0, 130.0, 90.0, 142.0),
        ]);
        assert_eq!(texts(&words), ["a", "b", "c", "next"]);
    }

    #[test]
    fn ghost_blocks_are_discarded() {
        let mapper = WordGeometryMapper::new(ColumnSplit::single_column(), 1000, 1000, 1.0);
        let words = mapper.map(vec![
            hit("banner", 0.0, 0.0, 950.0, 40.0),
            hit("blob", 100.0, 100.0, 700.0, 700.0),
            hit("tall", 100.0, 100.0, 200.0, 900.0),
            hit("wide", 100.0, 100.0, 700.0, 200.0),
        ]);
        assert_eq!(texts(&words), ["tall", "wide"]);
    }

    #[test]
    fn three_columns() {
        let mapper =
            WordGeometryMapper::new(ColumnSplit::new(vec![333.0, 666.0]), 1000, 1000, 1.0);
        let words = mapper.map(vec![
            hit("c", 700.0, 10.0, 750.0, 20.0),
            hit("b", 400.0, 10.0, 450.0, 20.0),
            hit("a", 10.0, 10.0, 50.0, 20.0),
        ]);
        let columns: Vec<usize> = words.iter().map(|w| w.column).collect();
        assert_eq!(columns, [0, 1, 2]);
    }

    #[test]
    fn empty_input_is_empty_output() {
        let mapper = WordGeometryMapper::new(ColumnSplit::single_column(), 10, 10, 1.0);
        assert!(mapper.map(Vec::new()).is_empty());
    }
}
