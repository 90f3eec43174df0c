//! 🧠欢迎光临🫐
//!
//! 涵盖了本 crate 一系列常用的功能.

pub use crate::{Idx3d, Idx4d, WorldCoord};

pub use crate::data::{AnatVolume, AtlasVolume, BoldScan, MaskVolume, NiftiHeaderAttr};

pub use crate::consts::morph::RESPONSE_THRESHOLD;
pub use crate::consts::{HIGH_PASS_HZ, LOW_PASS_HZ};

pub use crate::clean::clean_series;

pub use crate::dataset::{
    home_study_dir_with, FuncRun, StudyLayout, Subject, SubjectData,
};
pub use crate::dataset::{self, subject_loader};

pub use crate::stats::{
    compute_morph_scores, find_inflexion, fit_sigmoid, MorphScores, ScoreColumn,
    DEFAULT_SCORE_COLUMNS,
};

pub use crate::atlas::{find_region_names, load_cut_coords};
