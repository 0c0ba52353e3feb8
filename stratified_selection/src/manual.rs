/*!

This is the long-form manual for `stratified_selection` and `vrsurvey`.

## Quick start

A study is described by a JSON configuration file. It points to a table with the
metadata of the videos, declares how the videos should be stratified, and where the
ratings are stored.

```bash
vrsurvey check --config study.json
vrsurvey select --config study.json --user participant-07 --count 12
vrsurvey rate --config study.json --user participant-07 --video clip_04 \
    --scale naturalness=5 --scale confidence=0.8
vrsurvey rated --config study.json --user participant-07
```

`select` prints the plan of the participant: the videos to show, in order, and how
many videos were taken from every stratum. The videos that the participant already
rated are never selected again.

## Video metadata

The metadata is a table with one row per video. One column holds the id of the video
(by default the column `video`). If the id looks like a file name, only the stem is
kept: `clip_01.mp4` becomes `clip_01`. All the other columns are variables that can
be used for stratification.

```text
video,category,speaker
clip_01.mp4,A,f
clip_02.mp4,B,m
```

The following providers are supported:
* `csv` Comma Separated Values with a header row
* `xlsx` Excel workbook. The worksheet is chosen with `worksheetName` (first sheet by default).

## Stratification

The stratification is a list of rules. Each rule names a variable of the metadata,
the levels of this variable, and the proportion of each level:

```json
"stratification": [
  {"variable": "category", "levels": ["A", "B"], "proportions": [0.5, 0.5]},
  {"variable": "speaker", "levels": ["f", "m"], "proportions": [0.7, 0.3]}
]
```

The proportions of a rule must sum to 1 (with a tolerance of 0.001). The first rule
splits the requested number of videos between its levels. Each level is then split
again by the second rule, and so on. At every step the counts are rounded so that
they sum exactly to the count of the parent: the integer parts are given first, then
the leftover units go to the largest fractional parts (the first levels win the ties).

With 10 videos and the rules above: 5 videos of category `A` and 5 of category `B`,
and within each category 4 videos from `f` and 1 from `m` (3.5 rounded to 4, then
1.5 rounded to 1 to keep the total of 5).

### Policies

`unmatchedPolicy` controls the videos whose value is not one of the declared levels:
* `exclude` (default) these videos are never selected.
* `appendOverflow` they are used to fill a stratum that could not reach its count.
They are reported under the level `*`.

`shortfallPolicy` controls what happens when a stratum has fewer videos than allocated:
* `proportional` (default) the stratum gives what it has, the plan is shorter than
requested. The proportions between the other strata are preserved.
* `redistribute` the missing videos are asked from the sibling strata, following
their proportions. The plan is as long as possible, at the cost of the proportions.

When fewer videos than requested can be selected, the plan is marked as partial. This is
not an error.

## Storage

Ratings are stored in a local directory (one JSON-lines file per participant), on an
online spreadsheet endpoint, or both. With `both`, every rating is written to the two
backends and the save succeeds if at least one of them accepted it. Reading the rated
videos uses the primary backend first and falls back to the other one.

*/
