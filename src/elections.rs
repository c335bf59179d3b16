use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::{fs, path::Path};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Election {
    #[serde(default)]
    pub id: Option<u32>,
    pub title: String,
    pub description: String,
    /// Unix seconds
    pub start_time: i64,
    pub end_time: i64,
    pub status: String,
}

/// Presidential and parliamentary candidates share this shape. The table
/// they live in decides the category.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    #[serde(default)]
    pub id: Option<u32>,
    pub name: String,
    pub political_party: String,
    #[serde(default)]
    pub election_id: Option<u32>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Category {
    Presidential,
    Parliamentary,
}

impl Category {
    pub fn table(&self) -> &'static str {
        match self {
            Category::Presidential => "pres_candidates",
            Category::Parliamentary => "pal_candidates",
        }
    }
}

/// An election with its roster. `elections` keeps the key the frontend
/// already reads.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElectionBody {
    #[serde(alias = "election")]
    pub elections: Election,
    #[serde(default)]
    pub pres_candidates: Vec<Candidate>,
    #[serde(default)]
    pub pal_candidates: Vec<Candidate>,
}

impl ElectionBody {
    pub fn id(&self) -> Option<u32> {
        self.elections.id
    }

    pub fn candidates(&self, category: Category) -> &[Candidate] {
        match category {
            Category::Presidential => &self.pres_candidates,
            Category::Parliamentary => &self.pal_candidates,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Constituency {
    #[serde(default)]
    pub id: Option<u32>,
    pub region: String,
    pub name: String,
}

/// Reads every `*.vote` file of `dir` as an [`ElectionBody`].
pub fn load_election_files(dir: &Path) -> Result<Vec<ElectionBody>> {
    let mut elections = vec![];
    let mut entries = fs::read_dir(dir)?.collect::<Result<Vec<_>, _>>()?;
    entries.sort_by_key(|e| e.file_name());
    for e in entries {
        let path = e.path();
        if path.extension().and_then(|x| x.to_str()) == Some("vote") {
            let election_json = fs::File::open(&path)?;
            let v = serde_json::from_reader::<_, ElectionBody>(&election_json)?;
            tracing::info!("Election {} loaded from {}", v.elections.title, path.display());
            elections.push(v);
        }
    }
    Ok(elections)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_accepts_singular_election_key() {
        let body: ElectionBody = serde_json::from_str(
            r#"{"election": {"title": "General", "description": "2024",
                "start_time": 10, "end_time": 20, "status": "pending"},
                "pres_candidates": [{"name": "A", "political_party": "P"}]}"#,
        )
        .unwrap();
        assert_eq!(body.elections.title, "General");
        assert_eq!(body.id(), None);
        assert_eq!(body.candidates(Category::Presidential).len(), 1);
        assert!(body.pal_candidates.is_empty());
    }

    #[test]
    fn load_only_vote_files() {
        let dir = std::env::temp_dir().join(format!("openballot-load-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let body = r#"{"elections": {"title": "Runoff", "description": "",
            "start_time": 0, "end_time": 1, "status": "draft"}}"#;
        fs::write(dir.join("runoff.vote"), body).unwrap();
        fs::write(dir.join("notes.txt"), "ignored").unwrap();

        let loaded = load_election_files(&dir).unwrap();
        fs::remove_dir_all(&dir).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].elections.title, "Runoff");
    }
}
