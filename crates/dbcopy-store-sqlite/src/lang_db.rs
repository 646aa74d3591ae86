//! Language list, language words, model words and run option profiles.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use dbcopy_core::facet::{cap, CODE_MAX_LEN, NAME_MAX_LEN, OPTION_MAX_LEN, WORD_MAX_LEN};
use dbcopy_core::lang::{LangEntry, LangLstRow, LangMeta, ModelLangWord, ModelWordMeta};
use dbcopy_core::model::ModelDicRow;
use dbcopy_core::model_txt::ProfileMeta;
use rusqlite::{params, Connection, OptionalExtension};

use crate::ids;

/// # Errors
/// Returns an error when `lang_lst` or `lang_word` cannot be read.
pub fn read_lang(conn: &Connection) -> Result<LangMeta> {
    let mut stmt = conn
        .prepare("SELECT lang_id, lang_code, lang_name FROM lang_lst ORDER BY lang_id")
        .context("failed to prepare lang_lst query")?;
    let mut entries = stmt
        .query_map([], |row| {
            Ok(LangEntry {
                lang: LangLstRow { lang_id: row.get(0)?, lang_code: row.get(1)?, name: row.get(2)? },
                words: BTreeMap::new(),
            })
        })
        .context("failed to query lang_lst")?
        .collect::<rusqlite::Result<Vec<_>>>()
        .context("failed to decode lang_lst rows")?;

    let mut stmt = conn
        .prepare("SELECT lang_id, word_code, word_value FROM lang_word ORDER BY lang_id, word_code")
        .context("failed to prepare lang_word query")?;
    let mut rows = stmt.query([]).context("failed to query lang_word")?;
    while let Some(row) = rows.next().context("failed to iterate lang_word")? {
        let lang_id: i32 = row.get(0)?;
        if let Some(entry) = entries.iter_mut().find(|e| e.lang.lang_id == lang_id) {
            entry.words.insert(row.get(1)?, row.get(2)?);
        }
    }
    Ok(LangMeta::new(entries))
}

/// Insert languages missing from the database and merge their words, then
/// return the database language list with database ids.
///
/// # Errors
/// Returns an error when a row cannot be written.
pub fn write_lang(conn: &Connection, lang: &LangMeta) -> Result<LangMeta> {
    let max_id: Option<i32> = conn
        .query_row("SELECT MAX(lang_id) FROM lang_lst", [], |row| row.get(0))
        .context("failed to read max lang_id")?;
    ids::bump_to(conn, ids::LANG_ID, max_id.unwrap_or(0))?;

    for entry in &lang.lang {
        let code = cap(&entry.lang.lang_code, CODE_MAX_LEN);
        let existing: Option<i32> = conn
            .query_row("SELECT lang_id FROM lang_lst WHERE lang_code = ?1", params![code], |row| row.get(0))
            .optional()
            .with_context(|| format!("failed to find language {code}"))?;

        let lang_id = if let Some(id) = existing {
            conn.execute(
                "UPDATE lang_lst SET lang_name = ?1 WHERE lang_id = ?2",
                params![cap(&entry.lang.name, NAME_MAX_LEN), id],
            )
            .with_context(|| format!("failed to update language {code}"))?;
            id
        } else {
            let id = ids::next_id(conn, ids::LANG_ID)?;
            conn.execute(
                "INSERT INTO lang_lst (lang_id, lang_code, lang_name) VALUES (?1, ?2, ?3)",
                params![id, code, cap(&entry.lang.name, NAME_MAX_LEN)],
            )
            .with_context(|| format!("failed to insert language {code}"))?;
            id
        };

        for (word, value) in &entry.words {
            conn.execute(
                "INSERT OR REPLACE INTO lang_word (lang_id, word_code, word_value) VALUES (?1, ?2, ?3)",
                params![lang_id, cap(word, WORD_MAX_LEN), cap(value, WORD_MAX_LEN)],
            )
            .with_context(|| format!("failed to insert word {word} of language {code}"))?;
        }
    }
    read_lang(conn)
}

/// # Errors
/// Returns an error when `model_word` cannot be read.
pub fn read_model_words(conn: &Connection, model: &ModelDicRow, lang: &LangMeta) -> Result<ModelWordMeta> {
    let mut stmt = conn
        .prepare(
            "SELECT lang_id, word_code, word_value FROM model_word
             WHERE model_id = ?1 ORDER BY lang_id, word_code",
        )
        .context("failed to prepare model_word query")?;
    let mut rows = stmt.query(params![model.model_id]).context("failed to query model_word")?;

    let mut by_lang: Vec<ModelLangWord> = Vec::new();
    while let Some(row) = rows.next().context("failed to iterate model_word")? {
        let (code, _) = lang.code_by_id(row.get(0)?);
        match by_lang.iter_mut().find(|w| w.lang_code == code) {
            Some(w) => {
                w.words.insert(row.get(1)?, row.get(2)?);
            }
            None => by_lang.push(ModelLangWord {
                lang_code: code,
                words: BTreeMap::from([(row.get(1)?, row.get(2)?)]),
            }),
        }
    }
    Ok(ModelWordMeta { model_name: model.name.clone(), model_digest: model.digest.clone(), model_word: by_lang })
}

/// Replace model words; words of a language unknown to the database are
/// skipped. Returns the number of rows written.
///
/// # Errors
/// Returns an error when a row cannot be written.
pub fn write_model_words(conn: &Connection, model_id: i32, words: &ModelWordMeta, lang: &LangMeta) -> Result<usize> {
    let mut n = 0;
    for mw in &words.model_word {
        let (lang_id, ok) = lang.id_by_code(&mw.lang_code);
        if !ok {
            tracing::debug!(lang = %mw.lang_code, "skipping model words of unknown language");
            continue;
        }
        for (code, value) in &mw.words {
            conn.execute(
                "INSERT OR REPLACE INTO model_word (model_id, lang_id, word_code, word_value)
                 VALUES (?1, ?2, ?3, ?4)",
                params![model_id, lang_id, cap(code, WORD_MAX_LEN), cap(value, WORD_MAX_LEN)],
            )
            .with_context(|| format!("failed to insert model word {code}"))?;
            n += 1;
        }
    }
    Ok(n)
}

/// # Errors
/// Returns an error when profiles cannot be read.
pub fn read_profiles(conn: &Connection) -> Result<Vec<ProfileMeta>> {
    let mut stmt = conn
        .prepare(
            "SELECT P.profile_name, O.option_key, O.option_value
             FROM profile_lst P
             LEFT OUTER JOIN profile_option O ON (O.profile_name = P.profile_name)
             ORDER BY P.profile_name, O.option_key",
        )
        .context("failed to prepare profile query")?;
    let mut rows = stmt.query([]).context("failed to query profiles")?;

    let mut profiles: Vec<ProfileMeta> = Vec::new();
    while let Some(row) = rows.next().context("failed to iterate profiles")? {
        let name: String = row.get(0)?;
        if !matches!(profiles.last(), Some(p) if p.name == name) {
            profiles.push(ProfileMeta { name, opts: BTreeMap::new() });
        }
        let key: Option<String> = row.get(1)?;
        let value: Option<String> = row.get(2)?;
        if let (Some(key), Some(last)) = (key, profiles.last_mut()) {
            last.opts.insert(key, value.unwrap_or_default());
        }
    }
    Ok(profiles)
}

/// Insert or replace profiles with all their options.
///
/// # Errors
/// Returns an error when a row cannot be written.
pub fn write_profiles(conn: &Connection, profiles: &[ProfileMeta]) -> Result<()> {
    for p in profiles {
        let name = cap(&p.name, NAME_MAX_LEN);
        conn.execute("DELETE FROM profile_option WHERE profile_name = ?1", params![name])
            .with_context(|| format!("failed to delete options of profile {name}"))?;
        conn.execute("INSERT OR IGNORE INTO profile_lst (profile_name) VALUES (?1)", params![name])
            .with_context(|| format!("failed to insert profile {name}"))?;
        for (key, value) in &p.opts {
            conn.execute(
                "INSERT INTO profile_option (profile_name, option_key, option_value) VALUES (?1, ?2, ?3)",
                params![name, cap(key, NAME_MAX_LEN), cap(value, OPTION_MAX_LEN)],
            )
            .with_context(|| format!("failed to insert option {key} of profile {name}"))?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ModelDb;

    fn langs() -> LangMeta {
        LangMeta::new(vec![
            LangEntry {
                lang: LangLstRow { lang_id: 0, lang_code: "EN".into(), name: "English".into() },
                words: BTreeMap::from([("all".to_string(), "All".to_string())]),
            },
            LangEntry {
                lang: LangLstRow { lang_id: 1, lang_code: "FR".into(), name: "Français".into() },
                words: BTreeMap::from([("all".to_string(), "Tous".to_string())]),
            },
        ])
    }

    #[test]
    fn languages_get_database_ids_and_keep_words() -> Result<()> {
        let db = ModelDb::open_in_memory()?;
        let stored = write_lang(db.conn(), &langs())?;
        assert_eq!(stored.id_by_code("EN"), (1, true));
        assert_eq!(stored.id_by_code("FR"), (2, true));

        // writing again does not duplicate
        let again = write_lang(db.conn(), &langs())?;
        assert_eq!(again.lang.len(), 2);
        assert_eq!(again.lang[1].words.get("all").map(String::as_str), Some("Tous"));
        Ok(())
    }

    #[test]
    fn profiles_replace_their_options() -> Result<()> {
        let db = ModelDb::open_in_memory()?;
        let mut p = ProfileMeta {
            name: "modelOne".into(),
            opts: BTreeMap::from([("OpenM.Threads".to_string(), "4".to_string())]),
        };
        write_profiles(db.conn(), std::slice::from_ref(&p))?;
        p.opts = BTreeMap::from([("OpenM.SubValues".to_string(), "8".to_string())]);
        write_profiles(db.conn(), std::slice::from_ref(&p))?;

        let back = read_profiles(db.conn())?;
        assert_eq!(back, vec![p]);
        Ok(())
    }
}
