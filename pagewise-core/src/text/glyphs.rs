use super::{fold_case, TextPage, TextRange};
use crate::geometry::{PointF, RectF};

/// One character of extracted page text.
///
/// Generated characters such as line breaks carry an empty box.
#[derive(Debug, Clone, PartialEq)]
pub struct Glyph {
    pub ch: char,
    pub bounds: RectF,
    /// Baseline origin of the character.
    pub origin: PointF,
}

impl Glyph {
    pub fn new(ch: char, bounds: RectF) -> Self {
        Self {
            ch,
            bounds,
            origin: PointF::new(bounds.left(), bounds.bottom()),
        }
    }

    pub fn with_origin(mut self, origin: PointF) -> Self {
        self.origin = origin;
        self
    }
}

/// [`TextPage`] over glyphs extracted up front.
#[derive(Debug, Clone, Default)]
pub struct GlyphPage {
    glyphs: Vec<Glyph>,
}

impl GlyphPage {
    pub fn new(glyphs: Vec<Glyph>) -> Self {
        Self { glyphs }
    }

    pub fn glyphs(&self) -> &[Glyph] {
        &self.glyphs
    }

    fn range(&self, start: usize, count: usize) -> &[Glyph] {
        let start = start.min(self.glyphs.len());
        let end = start.saturating_add(count).min(self.glyphs.len());
        &self.glyphs[start..end]
    }
}

impl TextPage for GlyphPage {
    fn char_count(&self) -> usize {
        self.glyphs.len()
    }

    fn char_index_at(&self, point: PointF, tolerance: f64) -> Option<usize> {
        let boxed = || {
            self.glyphs
                .iter()
                .enumerate()
                .filter(|(_, glyph)| !glyph.bounds.is_empty())
        };
        if let Some((index, _)) = boxed().find(|(_, glyph)| glyph.bounds.contains(point)) {
            return Some(index);
        }
        boxed()
            .filter(|(_, glyph)| glyph.bounds.expanded(tolerance).contains(point))
            .min_by(|(_, a), (_, b)| {
                a.bounds
                    .distance_squared(point)
                    .total_cmp(&b.bounds.distance_squared(point))
            })
            .map(|(index, _)| index)
    }

    fn char_origin(&self, index: usize) -> Option<PointF> {
        self.glyphs.get(index).map(|glyph| glyph.origin)
    }

    fn char_box(&self, index: usize) -> Option<RectF> {
        self.glyphs.get(index).map(|glyph| glyph.bounds)
    }

    fn text(&self, start: usize, count: usize) -> String {
        self.range(start, count).iter().map(|glyph| glyph.ch).collect()
    }

    fn rects(&self, start: usize, count: usize) -> Vec<RectF> {
        let mut rects: Vec<RectF> = Vec::new();
        let mut previous_right = f64::NEG_INFINITY;
        for glyph in self.range(start, count) {
            let bounds = glyph.bounds;
            if bounds.is_empty() {
                continue;
            }
            let same_line = rects.last().map_or(false, |line| {
                line.overlaps_vertically(&bounds)
                    && bounds.left() >= previous_right - bounds.width / 2.0
            });
            match rects.last_mut() {
                Some(line) if same_line => *line = line.united(&bounds),
                _ => rects.push(bounds),
            }
            previous_right = bounds.right();
        }
        rects
    }

    fn find(&self, query: &str) -> Vec<TextRange> {
        let needle: Vec<char> = query.chars().map(fold_case).collect();
        if needle.is_empty() {
            return Vec::new();
        }
        let haystack: Vec<char> = self.glyphs.iter().map(|glyph| fold_case(glyph.ch)).collect();

        let mut matches = Vec::new();
        let mut at = 0;
        while at + needle.len() <= haystack.len() {
            if haystack[at..at + needle.len()] == needle[..] {
                matches.push(TextRange::new(at, needle.len()));
                at += needle.len();
            } else {
                at += 1;
            }
        }
        matches
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(text: &str, top: f64) -> Vec<Glyph> {
        text.chars()
            .enumerate()
            .map(|(i, ch)| Glyph::new(ch, RectF::new(10.0 + i as f64 * 6.0, top, 6.0, 10.0)))
            .collect()
    }

    fn two_lines() -> GlyphPage {
        let mut glyphs = line("Hello", 100.0);
        glyphs.push(Glyph::new('\n', RectF::at(PointF::new(40.0, 100.0))));
        glyphs.extend(line("world", 115.0));
        GlyphPage::new(glyphs)
    }

    #[test]
    fn hit_prefers_containing_box_then_nearest() {
        let page = two_lines();
        assert_eq!(page.char_index_at(PointF::new(11.0, 105.0), 16.0), Some(0));
        assert_eq!(page.char_index_at(PointF::new(50.0, 105.0), 16.0), Some(4));
        assert_eq!(page.char_index_at(PointF::new(300.0, 300.0), 16.0), None);
    }

    #[test]
    fn rects_split_on_line_breaks() {
        let page = two_lines();
        let rects = page.rects(2, 7);
        assert_eq!(rects.len(), 2);
        assert_eq!(rects[0], RectF::new(22.0, 100.0, 18.0, 10.0));
        assert_eq!(rects[1], RectF::new(10.0, 115.0, 18.0, 10.0));
    }

    #[test]
    fn find_is_case_insensitive_and_non_overlapping() {
        let page = GlyphPage::new(line("Aaaa aA", 0.0));
        let found = page.find("aa");
        assert_eq!(
            found,
            vec![TextRange::new(0, 2), TextRange::new(2, 2), TextRange::new(5, 2)]
        );
        assert!(page.find("").is_empty());
    }

    #[test]
    fn text_clamps_out_of_range() {
        let page = two_lines();
        assert_eq!(page.text(6, 100), "world");
        assert_eq!(page.text(50, 2), "");
    }
}
