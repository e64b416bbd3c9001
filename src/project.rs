//! Ordered segment collection for one translation job.

use serde::{Deserialize, Serialize};

use crate::segment::{SegText, Segment, SegmentId};
use crate::tm::LanguagePair;

/// A project owns its segments in document order. Ids come from a counter
/// that only moves forward, so an id is never reused and stays unambiguous
/// across export/reimport cycles. There is deliberately no merge, split or
/// remove operation; segments live as long as the project does.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub name: String,
    pub pair: LanguagePair,
    segments: Vec<Segment>,
    next_id: u64,
}

impl Project {
    pub fn new(name: impl Into<String>, pair: LanguagePair) -> Self {
        Project {
            name: name.into(),
            pair,
            segments: Vec::new(),
            next_id: 1,
        }
    }

    /// Append a segment for an imported translatable unit.
    pub fn add_segment(&mut self, source: SegText) -> SegmentId {
        let id = SegmentId(self.next_id);
        self.next_id += 1;
        self.segments.push(Segment::new(id, source));
        id
    }

    pub fn get(&self, id: SegmentId) -> Option<&Segment> {
        self.segments.iter().find(|segment| segment.id == id)
    }

    pub fn get_mut(&mut self, id: SegmentId) -> Option<&mut Segment> {
        self.segments.iter_mut().find(|segment| segment.id == id)
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Mutable view in document order. The slice keeps callers from
    /// reordering or dropping segments while letting them edit targets.
    pub fn segments_mut(&mut self) -> &mut [Segment] {
        &mut self.segments
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair() -> LanguagePair {
        LanguagePair::new("en", "fr")
    }

    #[test]
    fn segment_ids_start_at_one_and_increase() {
        let mut project = Project::new("manual", pair());
        assert_eq!(project.add_segment(SegText::from_text("a")), SegmentId(1));
        assert_eq!(project.add_segment(SegText::from_text("b")), SegmentId(2));
        assert_eq!(project.add_segment(SegText::from_text("c")), SegmentId(3));
        assert_eq!(project.len(), 3);
    }

    #[test]
    fn lookup_by_id_finds_the_right_segment() {
        let mut project = Project::new("manual", pair());
        project.add_segment(SegText::from_text("first"));
        let id = project.add_segment(SegText::from_text("second"));

        assert_eq!(project.get(id).unwrap().source().plain_text(), "second");
        assert!(project.get(SegmentId(99)).is_none());
    }

    #[test]
    fn id_counter_survives_serialization() {
        let mut project = Project::new("manual", pair());
        project.add_segment(SegText::from_text("a"));
        project.add_segment(SegText::from_text("b"));

        let json = serde_json::to_string(&project).unwrap();
        let mut restored: Project = serde_json::from_str(&json).unwrap();

        assert_eq!(restored.add_segment(SegText::from_text("c")), SegmentId(3));
    }
}
