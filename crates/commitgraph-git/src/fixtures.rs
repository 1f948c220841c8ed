//! Synthetic repositories for tests.
//!
//! Built with git2 alone so no git binary is needed. Commit times advance one
//! minute per commit from a fixed epoch, which keeps time-sorted walks stable.

use git2::{
    Index, IndexEntry, IndexTime, ObjectType, Oid, Repository, RepositoryInitOptions, Signature,
    Time,
};
use std::cell::Cell;
use std::path::Path;

const EPOCH: i64 = 1_700_000_000;

/// Writes commits, branches and tags straight into a repository.
pub struct RepoBuilder {
    repo: Repository,
    tick: Cell<i64>,
}

impl RepoBuilder {
    /// Initialise a fresh repository whose initial branch is `master`.
    pub fn init(path: &Path) -> Result<Self, git2::Error> {
        let mut opts = RepositoryInitOptions::new();
        opts.initial_head("master");
        let repo = Repository::init_opts(path, &opts)?;
        Ok(Self {
            repo,
            tick: Cell::new(0),
        })
    }

    /// Reopen a repository to keep adding to it. The clock continues after its newest commit.
    pub fn open(path: &Path) -> Result<Self, git2::Error> {
        let repo = Repository::open(path)?;
        let mut newest = EPOCH;
        for reference in repo.references()? {
            if let Ok(commit) = reference?.peel_to_commit() {
                newest = newest.max(commit.time().seconds());
            }
        }
        Ok(Self {
            repo,
            tick: Cell::new((newest - EPOCH) / 60 + 1),
        })
    }

    fn signature(&self, name: &str) -> Result<Signature<'static>, git2::Error> {
        let step = self.tick.get();
        self.tick.set(step + 1);
        let email = format!("{}@example.com", name.to_lowercase());
        Signature::new(name, &email, &Time::new(EPOCH + step * 60, 0))
    }

    /// Commit `files` on top of `branch`'s tip (or as a root) and advance the branch.
    pub fn commit(
        &self,
        branch: &str,
        author: &str,
        files: &[(&str, &str)],
        message: &str,
    ) -> Result<String, git2::Error> {
        let refname = format!("refs/heads/{}", branch);
        let parents: Vec<Oid> = match self.repo.refname_to_id(&refname) {
            Ok(tip) => vec![tip],
            Err(_) => Vec::new(),
        };
        self.commit_with_parents(&refname, &parents, author, files, &[], message)
    }

    /// Like [`RepoBuilder::commit`], also deleting `removed` paths.
    pub fn rewrite(
        &self,
        branch: &str,
        author: &str,
        files: &[(&str, &str)],
        removed: &[&str],
        message: &str,
    ) -> Result<String, git2::Error> {
        let refname = format!("refs/heads/{}", branch);
        let tip = self.repo.refname_to_id(&refname)?;
        self.commit_with_parents(&refname, &[tip], author, files, removed, message)
    }

    /// Merge `other`'s tip into `branch`. The tree is `branch`'s tree overlaid with `files`.
    pub fn merge(
        &self,
        branch: &str,
        other: &str,
        author: &str,
        files: &[(&str, &str)],
        message: &str,
    ) -> Result<String, git2::Error> {
        let refname = format!("refs/heads/{}", branch);
        let ours = self.repo.refname_to_id(&refname)?;
        let theirs = self.repo.refname_to_id(&format!("refs/heads/{}", other))?;
        self.commit_with_parents(&refname, &[ours, theirs], author, files, &[], message)
    }

    fn commit_with_parents(
        &self,
        refname: &str,
        parents: &[Oid],
        author: &str,
        files: &[(&str, &str)],
        removed: &[&str],
        message: &str,
    ) -> Result<String, git2::Error> {
        let parent_commits = parents
            .iter()
            .map(|oid| self.repo.find_commit(*oid))
            .collect::<Result<Vec<_>, _>>()?;

        let mut index = Index::new()?;
        if let Some(first) = parent_commits.first() {
            index.read_tree(&first.tree()?)?;
        }
        for path in removed {
            index.remove_path(Path::new(path))?;
        }
        for (path, content) in files {
            let blob = self.repo.blob(content.as_bytes())?;
            index.add(&IndexEntry {
                ctime: IndexTime::new(0, 0),
                mtime: IndexTime::new(0, 0),
                dev: 0,
                ino: 0,
                mode: 0o100644,
                uid: 0,
                gid: 0,
                file_size: content.len() as u32,
                id: blob,
                flags: 0,
                flags_extended: 0,
                path: path.as_bytes().to_vec(),
            })?;
        }
        let tree = self.repo.find_tree(index.write_tree_to(&self.repo)?)?;

        let signature = self.signature(author)?;
        let parent_refs: Vec<_> = parent_commits.iter().collect();
        let oid = self
            .repo
            .commit(None, &signature, &signature, message, &tree, &parent_refs)?;
        self.repo.reference(refname, oid, true, "fixture commit")?;
        Ok(oid.to_string())
    }

    /// Point a branch at a commit, creating it if needed.
    pub fn branch(&self, name: &str, target: &str) -> Result<(), git2::Error> {
        self.set_ref(&format!("refs/heads/{}", name), target)
    }

    /// Force a direct ref to a commit.
    pub fn set_ref(&self, refname: &str, target: &str) -> Result<(), git2::Error> {
        self.repo
            .reference(refname, Oid::from_str(target)?, true, "fixture ref")?;
        Ok(())
    }

    pub fn symbolic_ref(&self, refname: &str, target: &str) -> Result<(), git2::Error> {
        self.repo
            .reference_symbolic(refname, target, true, "fixture symref")?;
        Ok(())
    }

    /// Create an annotated tag on a commit.
    pub fn annotated_tag(
        &self,
        name: &str,
        target: &str,
        tagger: &str,
        message: &str,
    ) -> Result<(), git2::Error> {
        let object = self
            .repo
            .find_object(Oid::from_str(target)?, Some(ObjectType::Commit))?;
        let signature = self.signature(tagger)?;
        self.repo.tag(name, &object, &signature, message, true)?;
        Ok(())
    }

    pub fn repo(&self) -> &Repository {
        &self.repo
    }
}

/// Hashes of the commits in [`sample_repo`].
#[derive(Debug, Clone)]
pub struct SampleRepo {
    /// Alice adds README.md (root)
    pub readme: String,
    /// Bob adds src/policy/policy.cpp
    pub policy: String,
    /// Carol adds src/consensus/consensus.cpp on `feature`, co-authored by Dave
    pub consensus: String,
    /// Alice adds src/rpc/mempool.cpp on `master`
    pub mempool: String,
    /// Alice merges `feature` into `master`
    pub merge: String,
}

impl SampleRepo {
    pub fn all(&self) -> Vec<String> {
        vec![
            self.readme.clone(),
            self.policy.clone(),
            self.consensus.clone(),
            self.mempool.clone(),
            self.merge.clone(),
        ]
    }
}

pub const CONSENSUS_SOURCE: &str = "bool CheckBlock() {\n    return true;\n}\n";

/// Five commits by four identities across `master` and `feature`.
pub fn sample_repo(path: &Path) -> Result<SampleRepo, git2::Error> {
    let builder = RepoBuilder::init(path)?;

    let readme = builder.commit("master", "Alice", &[("README.md", "# Node\n")], "Add README")?;
    let policy = builder.commit(
        "master",
        "Bob",
        &[("src/policy/policy.cpp", "int fee = 1;\nint dust = 546;\n")],
        "Add relay policy",
    )?;

    builder.branch("feature", &policy)?;
    let consensus = builder.commit(
        "feature",
        "Carol",
        &[("src/consensus/consensus.cpp", CONSENSUS_SOURCE)],
        "Add block checks\n\nCo-authored-by: Dave <dave@example.com>\n",
    )?;

    let mempool = builder.commit(
        "master",
        "Alice",
        &[("src/rpc/mempool.cpp", "void getmempoolinfo() {}\n")],
        "Add mempool RPC",
    )?;

    let merge = builder.merge(
        "master",
        "feature",
        "Alice",
        &[("src/consensus/consensus.cpp", CONSENSUS_SOURCE)],
        "Merge branch 'feature'",
    )?;

    Ok(SampleRepo {
        readme,
        policy,
        consensus,
        mempool,
        merge,
    })
}
