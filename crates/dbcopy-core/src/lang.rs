//! Language list, language words and the message catalog built from them.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::ini::IniFile;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "PascalCase")]
pub struct LangLstRow {
    #[serde(skip)]
    pub lang_id: i32,
    pub lang_code: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "PascalCase")]
pub struct LangEntry {
    #[serde(flatten)]
    pub lang: LangLstRow,
    #[serde(default)]
    pub words: BTreeMap<String, String>,
}

/// Languages of a database, the content of `{model}.lang.json`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "PascalCase")]
pub struct LangMeta {
    #[serde(default)]
    pub lang: Vec<LangEntry>,
    #[serde(skip)]
    id_index: HashMap<i32, usize>,
    #[serde(skip)]
    code_index: HashMap<String, usize>,
    #[serde(skip)]
    messages: HashMap<String, HashMap<String, String>>,
}

impl LangMeta {
    #[must_use]
    pub fn new(lang: Vec<LangEntry>) -> Self {
        let mut meta = Self { lang, ..Self::default() };
        meta.update_internals();
        meta
    }

    pub fn update_internals(&mut self) {
        self.id_index.clear();
        self.code_index.clear();
        for (idx, entry) in self.lang.iter().enumerate() {
            self.id_index.insert(entry.lang.lang_id, idx);
            self.code_index.insert(entry.lang.lang_code.clone(), idx);
        }
    }

    /// Language id by code; falls back to the first language.
    #[must_use]
    pub fn id_by_code(&self, code: &str) -> (i32, bool) {
        match self.code_index.get(code) {
            Some(&idx) => (self.lang[idx].lang.lang_id, true),
            None => (self.lang.first().map_or(0, |e| e.lang.lang_id), false),
        }
    }

    /// Language code by id; falls back to the first language.
    #[must_use]
    pub fn code_by_id(&self, lang_id: i32) -> (String, bool) {
        match self.id_index.get(&lang_id) {
            Some(&idx) => (self.lang[idx].lang.lang_code.clone(), true),
            None => (self.lang.first().map(|e| e.lang.lang_code.clone()).unwrap_or_default(), false),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lang.is_empty()
    }

    /// Merge translated messages from an ini file where each section is a
    /// language code and each key is a message in the default language.
    pub fn append_lang_msg_from_ini(&mut self, ini: &IniFile) {
        for entry in ini.entries() {
            if entry.value.is_empty() {
                continue;
            }
            self.messages
                .entry(entry.section.to_ascii_lowercase())
                .or_default()
                .insert(entry.key.clone(), entry.value.clone());
        }
    }

    /// Translate a message to the given language, or return it unchanged.
    #[must_use]
    pub fn translate<'a>(&'a self, lang_code: &str, msg: &'a str) -> &'a str {
        let lower = lang_code.to_ascii_lowercase();
        let by_lang = self.messages.get(&lower).or_else(|| {
            lower.split(['-', '_']).next().and_then(|short| self.messages.get(short))
        });
        by_lang.and_then(|m| m.get(msg)).map_or(msg, String::as_str)
    }
}

/// Model-specific words per language.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "PascalCase")]
pub struct ModelLangWord {
    pub lang_code: String,
    #[serde(default)]
    pub words: BTreeMap<String, String>,
}

/// Content of `{model}.word.json`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "PascalCase")]
pub struct ModelWordMeta {
    pub model_name: String,
    pub model_digest: String,
    #[serde(default)]
    pub model_word: Vec<ModelLangWord>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_langs() -> LangMeta {
        LangMeta::new(vec![
            LangEntry {
                lang: LangLstRow { lang_id: 0, lang_code: "EN".into(), name: "English".into() },
                words: BTreeMap::from([("all".to_string(), "All".to_string())]),
            },
            LangEntry {
                lang: LangLstRow { lang_id: 1, lang_code: "FR".into(), name: "Français".into() },
                words: BTreeMap::new(),
            },
        ])
    }

    #[test]
    fn lookups_fall_back_to_first_language() {
        let meta = two_langs();
        assert_eq!(meta.id_by_code("FR"), (1, true));
        assert_eq!(meta.id_by_code("DE"), (0, false));
        assert_eq!(meta.code_by_id(1), ("FR".to_string(), true));
        assert_eq!(meta.code_by_id(9), ("EN".to_string(), false));
    }

    #[test]
    fn ini_messages_translate_by_language() -> anyhow::Result<()> {
        let mut meta = two_langs();
        let ini = IniFile::parse("[fr]\nmodel run not completed = exécution du modèle non terminée\n")?;
        meta.append_lang_msg_from_ini(&ini);
        assert_eq!(meta.translate("fr-CA", "model run not completed"), "exécution du modèle non terminée");
        assert_eq!(meta.translate("EN", "model run not completed"), "model run not completed");
        Ok(())
    }

    #[test]
    fn lang_json_keeps_words_and_drops_ids() -> anyhow::Result<()> {
        let meta = two_langs();
        let json = serde_json::to_string(&meta)?;
        assert!(json.contains("\"LangCode\":\"EN\""));
        assert!(!json.contains("LangId"));
        let mut back: LangMeta = serde_json::from_str(&json)?;
        back.update_internals();
        assert_eq!(back.lang[0].words.get("all").map(String::as_str), Some("All"));
        Ok(())
    }
}
