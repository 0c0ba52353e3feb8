pub use crate::config::*;

use std::collections::HashSet;

/// A builder for assembling the pool of videos and the stratification rules.
///
/// ```
/// pub use stratified_selection::builder::Builder;
/// pub use stratified_selection::SelectionRules;
/// # use stratified_selection::SelectionErrors;
///
/// let mut builder = Builder::new(&SelectionRules::DEFAULT_RULES)?
///     .strata(&[("category", &["A", "B"], &[0.5, 0.5])])?;
///
/// builder.add_video("clip_01", &[("category", "A")])?;
/// builder.add_video("clip_02", &[("category", "B")])?;
///
/// let plan = builder.select(2, &[], 42)?;
/// assert_eq!(plan.videos.len(), 2);
///
/// # Ok::<(), SelectionErrors>(())
/// ```
pub struct Builder {
    pub(crate) _rules: SelectionRules,
    pub(crate) _strata: Vec<StratificationRule>,
    pub(crate) _videos: Vec<VideoRecord>,
    pub(crate) _ids: HashSet<String>,
}

impl Builder {
    pub fn new(rules: &SelectionRules) -> Result<Builder, SelectionErrors> {
        Ok(Builder {
            _rules: rules.clone(),
            _strata: Vec::new(),
            _videos: Vec::new(),
            _ids: HashSet::new(),
        })
    }

    /// Sets the stratification rules, as (variable, levels, proportions).
    ///
    /// The rules are checked when the selection runs, against the videos added by then.
    pub fn strata(self, strata: &[(&str, &[&str], &[f64])]) -> Result<Builder, SelectionErrors> {
        Ok(Builder {
            _strata: strata
                .iter()
                .map(|(variable, levels, proportions)| {
                    StratificationRule::new(variable, levels, proportions)
                })
                .collect(),
            ..self
        })
    }

    /// Adds a video with its metadata.
    ///
    /// The ids must be unique.
    pub fn add_video(&mut self, id: &str, metadata: &[(&str, &str)]) -> Result<(), SelectionErrors> {
        self.add_video_2(&VideoRecord::new(id, metadata))
    }

    pub fn add_video_2(&mut self, video: &VideoRecord) -> Result<(), SelectionErrors> {
        if !self._ids.insert(video.id.clone()) {
            return Err(SelectionErrors::DuplicateVideo {
                video_id: video.id.clone(),
            });
        }
        self._videos.push(video.clone());
        Ok(())
    }

    pub fn videos(&self) -> &[VideoRecord] {
        &self._videos
    }

    /// Runs the selection with a seeded random source.
    ///
    /// excluded: the ids of the videos that must not be selected.
    pub fn select(
        &self,
        target_count: usize,
        excluded: &[&str],
        seed: u64,
    ) -> Result<SamplePlan, SelectionErrors> {
        let excluded: HashSet<String> = excluded.iter().map(|s| s.to_string()).collect();
        crate::select_videos_seeded(
            &self._videos,
            &self._strata,
            target_count,
            &excluded,
            &self._rules,
            seed,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_duplicate_ids() {
        let mut builder = Builder::new(&SelectionRules::DEFAULT_RULES).unwrap();
        builder.add_video("v1", &[("category", "A")]).unwrap();
        assert_eq!(
            builder.add_video("v1", &[("category", "B")]),
            Err(SelectionErrors::DuplicateVideo {
                video_id: "v1".to_string()
            })
        );
        assert_eq!(builder.videos().len(), 1);
    }

    #[test]
    fn selects_with_exclusions() {
        let mut builder = Builder::new(&SelectionRules::DEFAULT_RULES)
            .unwrap()
            .strata(&[("category", &["A", "B"], &[0.5, 0.5])])
            .unwrap();
        for (id, cat) in [("a1", "A"), ("a2", "A"), ("b1", "B"), ("b2", "B")] {
            builder.add_video(id, &[("category", cat)]).unwrap();
        }
        let plan = builder.select(2, &["a1", "b2"], 3).unwrap();
        let mut ids = plan.video_ids();
        ids.sort();
        assert_eq!(ids, vec!["a2".to_string(), "b1".to_string()]);
    }

    #[test]
    fn checks_the_rules_at_selection() {
        let mut builder = Builder::new(&SelectionRules::DEFAULT_RULES)
            .unwrap()
            .strata(&[("category", &["A", "B"], &[0.5, 0.6])])
            .unwrap();
        builder.add_video("a1", &[("category", "A")]).unwrap();
        assert!(matches!(
            builder.select(1, &[], 0),
            Err(SelectionErrors::ProportionSum { .. })
        ));
    }
}
