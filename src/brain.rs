//! The reference index ("brain"): every catalogued card print with its
//! signals, plus one contiguous descriptor pool with per-descriptor owner ids.

use std::collections::HashMap;
use std::path::Path;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::config::ExtractorConfig;
use crate::error::{Result, SightError};
use crate::features::{Descriptor, PerceptualHash, QuerySignals};

/// Bumped whenever the serialized layout or the descriptor sampling pattern
/// changes.
pub const BRAIN_VERSION: u32 = 2;

/// Extractor settings that decide whether two sets of signals are
/// comparable. Recorded in the artifact at compile time and checked against
/// the serving config.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExtractorSignature {
    pub canonical_width: u32,
    pub canonical_height: u32,
    pub center_crop_ratio: f32,
    pub hist_bins: [usize; 3],
    pub descriptor_bytes: u32,
}

impl ExtractorSignature {
    pub fn from_config(config: &ExtractorConfig) -> Self {
        Self {
            canonical_width: config.canonical_width,
            canonical_height: config.canonical_height,
            center_crop_ratio: config.center_crop_ratio,
            hist_bins: config.hist_bins,
            descriptor_bytes: std::mem::size_of::<Descriptor>() as u32,
        }
    }

    pub fn histogram_len(&self) -> usize {
        self.hist_bins.iter().product()
    }

    fn mismatches(&self, other: &Self) -> Vec<String> {
        let mut out = Vec::new();
        if (self.canonical_width, self.canonical_height) != (other.canonical_width, other.canonical_height) {
            out.push(format!(
                "canonical size {}x{} vs {}x{}",
                self.canonical_width, self.canonical_height, other.canonical_width, other.canonical_height
            ));
        }
        if self.center_crop_ratio != other.center_crop_ratio {
            out.push(format!(
                "center_crop_ratio {} vs {}",
                self.center_crop_ratio, other.center_crop_ratio
            ));
        }
        if self.hist_bins != other.hist_bins {
            out.push(format!("hist_bins {:?} vs {:?}", self.hist_bins, other.hist_bins));
        }
        if self.descriptor_bytes != other.descriptor_bytes {
            out.push(format!(
                "descriptor width {} vs {} bytes",
                self.descriptor_bytes, other.descriptor_bytes
            ));
        }
        out
    }
}

/// Carried through to results, never used for matching.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CardMetadata {
    pub oracle_text: Option<String>,
    pub mana_cost: Option<String>,
    pub image_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReferenceEntry {
    pub id: u32,
    pub name: String,
    pub set_code: String,
    pub histogram: Vec<f32>,
    /// Range of this entry's descriptors inside the pool.
    pub descriptor_start: u32,
    pub descriptor_len: u32,
    pub phash: PerceptualHash,
    pub metadata: CardMetadata,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReferenceIndex {
    version: u32,
    signature: ExtractorSignature,
    entries: Vec<ReferenceEntry>,
    descriptors: Vec<Descriptor>,
    /// `owners[i]` is the entry id that contributed `descriptors[i]`.
    owners: Vec<u32>,
    #[serde(skip)]
    name_lookup: HashMap<String, Vec<u32>>,
}

impl ReferenceIndex {
    /// Loads and validates an artifact. A missing file, a decode failure, an
    /// empty pool or a dangling back-reference are all errors: a process
    /// must not serve requests from a half-usable index.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(SightError::MissingArtifact(path.to_path_buf()));
        }
        let start = Instant::now();
        let data = std::fs::read(path).map_err(|e| SightError::io(path, e))?;
        let mut index: ReferenceIndex =
            bincode::deserialize(&data).map_err(|e| SightError::CorruptArtifact {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
        index.validate()?;
        index.rebuild_lookup();
        tracing::info!(
            path = %path.display(),
            entries = index.entries.len(),
            descriptors = index.descriptors.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "reference index loaded"
        );
        Ok(index)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let encoded = bincode::serialize(self).map_err(|e| SightError::CorruptArtifact {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| SightError::io(parent, e))?;
        }
        std::fs::write(path, encoded).map_err(|e| SightError::io(path, e))?;
        tracing::info!(path = %path.display(), entries = self.entries.len(), "reference index saved");
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.version != BRAIN_VERSION {
            return Err(SightError::ArtifactVersion {
                found: self.version,
                expected: BRAIN_VERSION,
            });
        }
        if self.descriptors.is_empty() {
            return Err(SightError::EmptyDescriptorPool);
        }
        if self.owners.len() != self.descriptors.len() {
            return Err(SightError::OwnerTable {
                descriptors: self.descriptors.len(),
                owners: self.owners.len(),
            });
        }
        if let Some((i, &owner)) = self
            .owners
            .iter()
            .enumerate()
            .find(|(_, &o)| o as usize >= self.entries.len())
        {
            return Err(SightError::InvalidBackReference {
                descriptor: i,
                owner,
                entries: self.entries.len(),
            });
        }

        let hist_len = self.signature.histogram_len();
        let mut expected_start = 0usize;
        for (pos, entry) in self.entries.iter().enumerate() {
            let fail = |reason: String| {
                Err(SightError::InconsistentEntry {
                    id: entry.id,
                    reason,
                })
            };
            if entry.id as usize != pos {
                return fail(format!("stored at position {}", pos));
            }
            if entry.histogram.len() != hist_len {
                return fail(format!(
                    "histogram has {} bins, expected {}",
                    entry.histogram.len(),
                    hist_len
                ));
            }
            let start = entry.descriptor_start as usize;
            let end = start + entry.descriptor_len as usize;
            if start != expected_start || end > self.descriptors.len() {
                return fail(format!("descriptor range {}..{} is not contiguous", start, end));
            }
            if self.owners[start..end].iter().any(|&o| o != entry.id) {
                return fail("descriptor range owned by another entry".into());
            }
            expected_start = end;
        }
        if expected_start != self.descriptors.len() {
            return Err(SightError::OwnerTable {
                descriptors: self.descriptors.len(),
                owners: expected_start,
            });
        }
        Ok(())
    }

    /// Refuses to serve with extractor settings other than the ones the
    /// index was compiled with: histograms of different shapes do not
    /// correlate, and every request would come back as no match.
    pub fn check_extractor(&self, config: &ExtractorConfig) -> Result<()> {
        let serving = ExtractorSignature::from_config(config);
        let mismatches = self.signature.mismatches(&serving);
        if mismatches.is_empty() {
            return Ok(());
        }
        Err(SightError::InvalidConfig(format!(
            "extractor settings differ from the reference index: {}",
            mismatches.join(", ")
        )))
    }

    pub fn signature(&self) -> &ExtractorSignature {
        &self.signature
    }

    fn rebuild_lookup(&mut self) {
        self.name_lookup.clear();
        for entry in &self.entries {
            for key in name_keys(&entry.name) {
                self.name_lookup.entry(key).or_default().push(entry.id);
            }
        }
        for ids in self.name_lookup.values_mut() {
            ids.dedup();
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[ReferenceEntry] {
        &self.entries
    }

    pub fn entry(&self, id: u32) -> Option<&ReferenceEntry> {
        self.entries.get(id as usize)
    }

    pub fn descriptor_pool(&self) -> &[Descriptor] {
        &self.descriptors
    }

    pub fn owner_of(&self, descriptor: usize) -> u32 {
        self.owners[descriptor]
    }

    pub fn descriptors_of(&self, id: u32) -> &[Descriptor] {
        match self.entry(id) {
            Some(e) => {
                let start = e.descriptor_start as usize;
                &self.descriptors[start..start + e.descriptor_len as usize]
            }
            None => &[],
        }
    }

    /// Every print carrying this name. Matching ignores case, and a
    /// double-faced card also answers to its front face.
    pub fn resolve_name(&self, name: &str) -> &[u32] {
        self.name_lookup
            .get(&normalize_name(name))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

pub(crate) fn normalize_name(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn name_keys(name: &str) -> Vec<String> {
    let full = normalize_name(name);
    let mut keys = vec![full.clone()];
    if let Some((front, _)) = full.split_once("//") {
        let front = front.trim();
        if !front.is_empty() && front != full {
            keys.push(front.to_string());
        }
    }
    keys
}

/// Assembles an index entry by entry; ids follow insertion order.
pub struct IndexBuilder {
    signature: ExtractorSignature,
    entries: Vec<ReferenceEntry>,
    descriptors: Vec<Descriptor>,
    owners: Vec<u32>,
}

impl IndexBuilder {
    pub fn new(signature: ExtractorSignature) -> Self {
        Self {
            signature,
            entries: Vec::new(),
            descriptors: Vec::new(),
            owners: Vec::new(),
        }
    }

    pub fn for_extractor(config: &ExtractorConfig) -> Self {
        Self::new(ExtractorSignature::from_config(config))
    }

    pub fn push(
        &mut self,
        name: impl Into<String>,
        set_code: impl Into<String>,
        signals: QuerySignals,
        metadata: CardMetadata,
    ) -> u32 {
        let id = self.entries.len() as u32;
        let start = self.descriptors.len() as u32;
        let len = signals.descriptors.len() as u32;
        self.owners.extend(std::iter::repeat(id).take(signals.descriptors.len()));
        self.descriptors.extend(signals.descriptors);
        self.entries.push(ReferenceEntry {
            id,
            name: name.into(),
            set_code: set_code.into(),
            histogram: signals.histogram,
            descriptor_start: start,
            descriptor_len: len,
            phash: signals.phash,
            metadata,
        });
        id
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn finish(self) -> Result<ReferenceIndex> {
        let mut index = ReferenceIndex {
            version: BRAIN_VERSION,
            signature: self.signature,
            entries: self.entries,
            descriptors: self.descriptors,
            owners: self.owners,
            name_lookup: HashMap::new(),
        };
        index.validate()?;
        index.rebuild_lookup();
        Ok(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{index_builder, random_descriptors, signals_with};

    fn two_card_index() -> ReferenceIndex {
        let mut builder = index_builder(2);
        builder.push("Lightning Bolt", "m10", signals_with(vec![1.0, 0.0], random_descriptors(5, 1)), CardMetadata::default());
        builder.push(
            "Fire // Ice",
            "apc",
            signals_with(vec![0.0, 1.0], random_descriptors(3, 2)),
            CardMetadata {
                mana_cost: Some("{1}{R}".into()),
                ..CardMetadata::default()
            },
        );
        builder.finish().unwrap()
    }

    #[test]
    fn builder_assigns_ids_and_ranges() {
        let index = two_card_index();
        assert_eq!(index.len(), 2);
        assert_eq!(index.descriptor_pool().len(), 8);
        assert_eq!(index.descriptors_of(0).len(), 5);
        assert_eq!(index.descriptors_of(1).len(), 3);
        assert_eq!(index.owner_of(4), 0);
        assert_eq!(index.owner_of(5), 1);
        assert!(index.descriptors_of(9).is_empty());
    }

    #[test]
    fn names_resolve_case_insensitively() {
        let index = two_card_index();
        assert_eq!(index.resolve_name("lightning  BOLT"), &[0]);
        assert_eq!(index.resolve_name("Fire // Ice"), &[1]);
        assert_eq!(index.resolve_name("fire"), &[1]);
        assert!(index.resolve_name("Counterspell").is_empty());
    }

    #[test]
    fn empty_pool_is_rejected() {
        let mut builder = index_builder(1);
        builder.push("Blank", "xxx", signals_with(vec![1.0], Vec::new()), CardMetadata::default());
        assert!(matches!(builder.finish(), Err(SightError::EmptyDescriptorPool)));
    }

    #[test]
    fn dangling_owner_is_rejected() {
        let mut index = two_card_index();
        index.owners[2] = 7;
        assert!(matches!(
            index.validate(),
            Err(SightError::InvalidBackReference { descriptor: 2, owner: 7, entries: 2 })
        ));
    }

    #[test]
    fn foreign_owner_inside_range_is_rejected() {
        let mut index = two_card_index();
        index.owners[0] = 1;
        assert!(matches!(index.validate(), Err(SightError::InconsistentEntry { id: 0, .. })));
    }

    #[test]
    fn histogram_shape_must_match_signature() {
        let mut builder = index_builder(3);
        builder.push("Short", "xxx", signals_with(vec![1.0, 0.0], random_descriptors(2, 3)), CardMetadata::default());
        assert!(matches!(builder.finish(), Err(SightError::InconsistentEntry { id: 0, .. })));
    }

    #[test]
    fn serving_with_other_extractor_settings_is_refused() {
        let index = two_card_index();
        let mut config = ExtractorConfig {
            hist_bins: [2, 1, 1],
            ..ExtractorConfig::default()
        };
        index.check_extractor(&config).unwrap();

        config.hist_bins = [1, 2, 1];
        let err = index.check_extractor(&config).unwrap_err();
        assert!(matches!(&err, SightError::InvalidConfig(msg) if msg.contains("hist_bins")), "{}", err);

        config.hist_bins = [2, 1, 1];
        config.center_crop_ratio = 0.6;
        assert!(matches!(index.check_extractor(&config), Err(SightError::InvalidConfig(_))));
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("brain.bin");
        let index = two_card_index();
        index.save(&path).unwrap();
        let loaded = ReferenceIndex::load(&path).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded.descriptors_of(1), index.descriptors_of(1));
        assert_eq!(loaded.entry(1).unwrap().metadata.mana_cost.as_deref(), Some("{1}{R}"));
        assert_eq!(loaded.resolve_name("ICE"), &[] as &[u32]);
        assert_eq!(loaded.resolve_name("fire"), &[1]);
        assert_eq!(loaded.signature(), index.signature());
    }

    #[test]
    fn missing_and_garbage_files_fail() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("none.bin");
        assert!(matches!(ReferenceIndex::load(&missing), Err(SightError::MissingArtifact(_))));

        let garbage = dir.path().join("garbage.bin");
        std::fs::write(&garbage, b"not an index").unwrap();
        assert!(ReferenceIndex::load(&garbage).is_err());
    }
}
