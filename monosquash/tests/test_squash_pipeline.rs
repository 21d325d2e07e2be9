use std::{
    collections::{BTreeMap, BTreeSet},
    fs,
    io::Read,
    path::Path,
};

use serde_json::{json, Value};
use tar::{Archive, Builder, EntryType, Header};
use tempfile::tempdir;

use monosquash::{
    config::{RepoTag, SquashOptions, StartPoint},
    management, SquashError,
};

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[test_log::test(tokio::test)]
async fn test_squash_pipeline_round_trip_tag() -> anyhow::Result<()> {
    let temp = tempdir()?;
    let (input, ids) = helper::write_export(temp.path(), &[], "orig")?;
    let output = temp.path().join("squashed.tar");
    let scratch = temp.path().join("scratch");
    fs::create_dir_all(&scratch)?;

    let options = SquashOptions::builder()
        .input(&input)
        .output(&output)
        .tmp_dir(&scratch)
        .tag("myrepo:stable".parse::<RepoTag>()?)
        .build();
    let outcome = management::squash::squash_image(&options).await?;

    // Working directory is gone
    assert_eq!(fs::read_dir(&scratch)?.count(), 0);
    assert!(outcome.get_kept_work_dir().is_none());

    let squashed = outcome.get_layer_id().clone();
    assert!(!ids.contains(&squashed));

    let export = helper::read_export(&output)?;
    assert_eq!(
        export.repositories["myrepo"]["stable"],
        Value::String(squashed.clone())
    );
    assert_eq!(
        export.repositories["orig"]["latest"],
        Value::String(squashed.clone())
    );

    // Base layer plus the squashed layer, the merged ones are retired
    assert_eq!(export.order, vec![ids[0].clone(), squashed.clone()]);
    assert!(!export.layers.contains_key(&ids[1]));
    assert!(!export.layers.contains_key(&ids[2]));

    let config = &export.layers[&squashed].config;
    assert_eq!(config["parent"], Value::String(ids[0].clone()));
    assert_eq!(config["id"], Value::String(squashed.clone()));
    assert!(config["container_config"]["Cmd"][2]
        .as_str()
        .is_some_and(|cmd| cmd.contains("#(squash)")));

    let entries = &export.layers[&squashed].entries;
    assert!(entries.contains("app/a"));
    assert!(entries.contains("app/b"));
    assert!(entries.contains("etc/.wh.motd"));
    assert!(!entries.contains("etc/motd"));

    assert_eq!(outcome.get_history().len(), 2);

    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_squash_pipeline_from_explicit_layer() -> anyhow::Result<()> {
    let temp = tempdir()?;
    let (input, ids) = helper::write_export(temp.path(), &[], "orig")?;
    let output = temp.path().join("squashed.tar");

    let options = SquashOptions::builder()
        .input(&input)
        .output(&output)
        .tmp_dir(temp.path())
        .from(StartPoint::Layer(ids[1][..12].to_string()))
        .build();
    let outcome = management::squash::squash_image(&options).await?;

    let export = helper::read_export(&output)?;
    assert_eq!(
        export.order,
        vec![ids[0].clone(), ids[1].clone(), outcome.get_layer_id().clone()]
    );

    let entries = &export.layers[outcome.get_layer_id()].entries;
    assert!(entries.contains("app/b"));
    assert!(!entries.contains("app/a"));

    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_squash_pipeline_rejects_multiple_images() -> anyhow::Result<()> {
    let temp = tempdir()?;
    let (input, _) = helper::write_export(temp.path(), &["stale"], "app")?;
    let output = temp.path().join("squashed.tar");
    let scratch = temp.path().join("scratch");
    fs::create_dir_all(&scratch)?;

    let options = SquashOptions::builder()
        .input(&input)
        .output(&output)
        .tmp_dir(&scratch)
        .build();
    let result = management::squash::squash_image(&options).await;

    assert!(matches!(result, Err(SquashError::AmbiguousExport(_))));
    assert!(!output.exists());
    assert_eq!(fs::read_dir(&scratch)?.count(), 0);

    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_squash_pipeline_keeps_work_dir() -> anyhow::Result<()> {
    let temp = tempdir()?;
    let (input, _) = helper::write_export(temp.path(), &[], "orig")?;
    let scratch = temp.path().join("scratch");

    let options = SquashOptions::builder()
        .input(&input)
        .output(temp.path().join("squashed.tar"))
        .tmp_dir(&scratch)
        .keep_temp(true)
        .build();
    let outcome = management::squash::squash_image(&options).await?;

    let kept = outcome
        .get_kept_work_dir()
        .clone()
        .expect("work dir should be kept");
    assert!(kept.starts_with(&scratch));
    assert!(kept.join("repositories").exists());
    assert!(kept.join(outcome.get_layer_id()).join("layer.tar").exists());

    Ok(())
}

//--------------------------------------------------------------------------------------------------
// Helpers
//--------------------------------------------------------------------------------------------------

mod helper {
    use super::*;

    pub(super) struct Layer {
        pub(super) config: Value,
        pub(super) entries: BTreeSet<String>,
    }

    pub(super) struct Export {
        pub(super) repositories: Value,
        pub(super) layers: BTreeMap<String, Layer>,
        pub(super) order: Vec<String>,
    }

    /// Writes a three layer export: a base filesystem, a layer adding `/app/a` and one adding
    /// `/app/b` while deleting `/etc/motd`. Every name in `extra_tags` tags the middle layer.
    pub(super) fn write_export(
        dir: &Path,
        extra_tags: &[&str],
        repo: &str,
    ) -> anyhow::Result<(std::path::PathBuf, Vec<String>)> {
        let ids: Vec<String> = ["a1", "b2", "c3"]
            .iter()
            .map(|seed| format!("{seed:f<64}"))
            .collect();

        let layers = [
            (
                "/bin/sh -c #(nop) ADD file:1a2b in /",
                vec![("etc/", None), ("etc/motd", Some("hello"))],
            ),
            (
                "/bin/sh -c mkdir /app && echo a > /app/a",
                vec![("app/", None), ("app/a", Some("a"))],
            ),
            (
                "/bin/sh -c echo b > /app/b && rm /etc/motd",
                vec![
                    ("app/", None),
                    ("app/b", Some("b")),
                    ("etc/", None),
                    ("etc/.wh.motd", Some("")),
                ],
            ),
        ];

        let path = dir.join("export.tar");
        let mut builder = Builder::new(fs::File::create(&path)?);

        for (idx, (cmd, nodes)) in layers.iter().enumerate() {
            let id = &ids[idx];
            let mut config = json!({
                "id": id,
                "created": "2020-09-13T12:26:40Z",
                "container_config": { "Cmd": ["/bin/sh", "-c", cmd] },
                "config": { "Env": ["PATH=/usr/bin:/bin"] },
                "architecture": "amd64",
                "os": "linux",
            });
            if idx > 0 {
                config["parent"] = Value::String(ids[idx - 1].clone());
            }

            append(&mut builder, &format!("{id}/"), None)?;
            append(&mut builder, &format!("{id}/VERSION"), Some(b"1.0"))?;
            append(
                &mut builder,
                &format!("{id}/json"),
                Some(&serde_json::to_vec(&config)?),
            )?;
            append(
                &mut builder,
                &format!("{id}/layer.tar"),
                Some(&layer_tar(nodes)?),
            )?;
        }

        let mut tags = serde_json::Map::new();
        tags.insert("latest".to_string(), Value::String(ids[2].clone()));
        for tag in extra_tags {
            tags.insert(tag.to_string(), Value::String(ids[1].clone()));
        }
        let mut repositories = serde_json::Map::new();
        repositories.insert(repo.to_string(), Value::Object(tags));
        append(
            &mut builder,
            "repositories",
            Some(&serde_json::to_vec(&Value::Object(repositories))?),
        )?;

        builder.finish()?;
        Ok((path, ids))
    }

    /// Reads an export archive back into memory, keeping the order its layers appear in.
    pub(super) fn read_export(path: &Path) -> anyhow::Result<Export> {
        let mut repositories = Value::Null;
        let mut configs = BTreeMap::new();
        let mut tars = BTreeMap::new();
        let mut order = Vec::new();

        let mut archive = Archive::new(fs::File::open(path)?);
        for entry in archive.entries()? {
            let mut entry = entry?;
            let name = entry.path()?.to_string_lossy().trim_end_matches('/').to_string();
            let mut data = Vec::new();
            entry.read_to_end(&mut data)?;

            match name.split_once('/') {
                None if name == "repositories" => repositories = serde_json::from_slice(&data)?,
                None => order.push(name),
                Some((id, "json")) => {
                    configs.insert(id.to_string(), serde_json::from_slice::<Value>(&data)?);
                }
                Some((id, "layer.tar")) => {
                    tars.insert(id.to_string(), data);
                }
                Some(_) => {}
            }
        }

        let mut layers = BTreeMap::new();
        for (id, config) in configs {
            let data = tars.remove(&id).unwrap_or_default();
            let mut entries = BTreeSet::new();
            for entry in Archive::new(data.as_slice()).entries()? {
                let entry = entry?;
                let name = entry.path()?.to_string_lossy().to_string();
                let name = name.trim_start_matches("./").trim_end_matches('/');
                if !name.is_empty() && name != "." {
                    entries.insert(name.to_string());
                }
            }
            layers.insert(id, Layer { config, entries });
        }

        Ok(Export {
            repositories,
            layers,
            order,
        })
    }

    fn layer_tar(nodes: &[(&str, Option<&str>)]) -> anyhow::Result<Vec<u8>> {
        let mut builder = Builder::new(Vec::new());
        for &(name, contents) in nodes {
            append(&mut builder, name, contents.map(str::as_bytes))?;
        }
        Ok(builder.into_inner()?)
    }

    fn append<W: std::io::Write>(
        builder: &mut Builder<W>,
        name: &str,
        contents: Option<&[u8]>,
    ) -> anyhow::Result<()> {
        let mut header = Header::new_gnu();
        header.set_mtime(1_600_000_000);
        header.set_uid(0);
        header.set_gid(0);
        match contents {
            None => {
                header.set_entry_type(EntryType::Directory);
                header.set_mode(0o755);
                header.set_size(0);
                builder.append_data(&mut header, name, std::io::empty())?;
            }
            Some(data) => {
                header.set_entry_type(EntryType::Regular);
                header.set_mode(0o644);
                header.set_size(data.len() as u64);
                builder.append_data(&mut header, name, data)?;
            }
        }
        Ok(())
    }
}
