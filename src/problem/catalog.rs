//! Built-in git task catalog.
//!
//! All tasks start from the same snapshot of the ClickHouse repository. Each
//! golden sequence runs with the repository directory as its working
//! directory.

use crate::grading::{GitGraderConfig, GraderSpec, MembershipRule};

use super::{Difficulty, ProblemSpec};

/// Commit every catalog environment is reset to.
pub const CATALOG_BASE: &str = "cafc904fc34cc78e51c459ea86dd981486ae0589";

/// Commit the history-rewriting tasks count from.
pub const REWRITE_POINT: &str = "2d0bfff1ffba4a6ac8ee3fbcff7f7624cf2f0f16";

/// Tree of the unmodified tip of `master`.
const TIP_TREE: &str = "97f674f0359a4dfb3fb815bda90b105ca3b12413";

const BROKEN_RNG_SOURCE: &str = r#"cat > src/Common/thread_local_rng.cpp << 'EOF'
#include <Common/thread_local_rng.h>
#include <Common/randomSeed.h>
#include <memory>

// Refactor: Lazy initialization to improve thread creation performance
namespace
{
    struct RNGInitializer
    {
        pcg64* rng;

        RNGInitializer()
        {
            rng = new pcg64(randomSeed());
        }

        pcg64& get()
        {
            return *rng;
        }
    };
}

thread_local RNGInitializer thread_local_rng_impl;

pcg64 thread_local_rng = thread_local_rng_impl.get();
EOF"#;

const REWRITE_EMAILS_FILTER: &str = r#"git filter-branch --force --env-filter '
if [ "$GIT_AUTHOR_EMAIL" = "a3at.mail@gmail.com" ]; then
    export GIT_AUTHOR_EMAIL="a.khuzhin@clickhouse.com"
fi
if [ "$GIT_AUTHOR_EMAIL" = "hanfei19910905@gmail.com" ]; then
    export GIT_AUTHOR_EMAIL="han.fei@clickhouse.com"
fi
if [ "$GIT_COMMITTER_EMAIL" = "a3at.mail@gmail.com" ]; then
    export GIT_COMMITTER_EMAIL="a.khuzhin@clickhouse.com"
fi
if [ "$GIT_COMMITTER_EMAIL" = "hanfei19910905@gmail.com" ]; then
    export GIT_COMMITTER_EMAIL="han.fei@clickhouse.com"
fi
' --tag-name-filter cat -- 2d0bfff1ffba4a6ac8ee3fbcff7f7624cf2f0f16..HEAD"#;

fn git_grader(tree: &str, base: &str, count: u64, first_parent: bool) -> GitGraderConfig {
    GitGraderConfig::new(tree).with_commit_count(base, count, first_parent)
}

/// Returns the built-in tasks in id order.
pub fn builtin_problems() -> Vec<ProblemSpec> {
    let mut problems = vec![
        ProblemSpec::new(
            "squash-commits-first-parent",
            format!(
                "Squash all commits in `master` after `{REWRITE_POINT}` (following first-parent history) into a single commit."
            ),
            Difficulty::Easy,
            CATALOG_BASE,
        )
        .with_golden([format!(
            r#"GIT_SEQUENCE_EDITOR='sed -i "2,\$s/^pick/squash/"' GIT_EDITOR='sed -i "1s/.*/Squashed commits/; 2,\$d"' git rebase -i {REWRITE_POINT}"#
        )])
        .with_grader(GraderSpec::Git(git_grader(TIP_TREE, REWRITE_POINT, 1, true))),
        ProblemSpec::new(
            "squash-commits-all-history",
            format!(
                "Squash all commits since `{REWRITE_POINT}` into a single commit. Count commits including merged branches (not just first-parent)."
            ),
            Difficulty::Easy,
            CATALOG_BASE,
        )
        .with_golden([
            format!("git reset --soft {REWRITE_POINT}"),
            "git commit -m 'Squashed commits'".to_string(),
        ])
        .with_grader(GraderSpec::Git(git_grader(TIP_TREE, REWRITE_POINT, 1, false))),
        ProblemSpec::new(
            "amend-old-commit",
            "Add the exact line `# TODO: Change this email` to the end of the README.md file in commit `4e2e5799753` (fix logical error when low cardinality use statistics). The subsequent commits should remain unchanged.",
            Difficulty::Medium,
            CATALOG_BASE,
        )
        .with_golden([
            format!(
                r#"GIT_SEQUENCE_EDITOR='sed -i "/4e2e5799753/s/^pick/edit/"' git rebase -i {REWRITE_POINT}"#
            ),
            "echo '# TODO: Change this email' >> README.md".to_string(),
            "git add README.md".to_string(),
            "GIT_EDITOR=true git commit --amend --no-edit".to_string(),
            "GIT_EDITOR=true git rebase --continue".to_string(),
        ])
        .with_grader(GraderSpec::Git(git_grader(
            "f77f602f849981b664d92004fe8534182005e3c9",
            REWRITE_POINT,
            8,
            true,
        ))),
        ProblemSpec::new(
            "cherry-pick-merge-commits",
            format!(
                "Create a new branch called `release-branch` from commit `{REWRITE_POINT}`, then cherry-pick this merge commit from master: 634b7ba69fc492f0894559bac901d9ee1b2a20ce"
            ),
            Difficulty::Medium,
            CATALOG_BASE,
        )
        .with_golden([
            format!("git checkout -b release-branch {REWRITE_POINT}"),
            "git cherry-pick -m 1 634b7ba69fc492f0894559bac901d9ee1b2a20ce".to_string(),
        ])
        .with_grader(GraderSpec::Git(git_grader(
            "b329cdbab4993963108151f56c1189077cf28443",
            REWRITE_POINT,
            1,
            true,
        ))),
        ProblemSpec::new(
            "rewrite-author-emails",
            format!(
                "The repository has commits from contributors using personal emails. Rewrite the git history\n\
                 to change the following emails (both author and committer emails) to company emails for all commits after `{REWRITE_POINT}`:\n\n\
                 - Change `a3at.mail@gmail.com` to `a.khuzhin@clickhouse.com`\n\
                 - Change `hanfei19910905@gmail.com` to `han.fei@clickhouse.com`"
            ),
            Difficulty::Medium,
            CATALOG_BASE,
        )
        .with_golden([
            REWRITE_EMAILS_FILTER,
            "rm -rf .git/refs/original/",
            "git reflog expire --expire=now --all",
            "git gc --prune=now",
        ])
        .with_grader(GraderSpec::Git(
            git_grader(TIP_TREE, REWRITE_POINT, 5, true).with_author_emails(
                MembershipRule::default()
                    .must_contain(["a.khuzhin@clickhouse.com", "han.fei@clickhouse.com"])
                    .must_not_contain(["a3at.mail@gmail.com", "hanfei19910905@gmail.com"]),
            ),
        )),
        ProblemSpec::new(
            "update-submodule-commit",
            "There's a bug in the `contrib/zstd` submodule, roll it back to its parent commit.",
            Difficulty::Medium,
            CATALOG_BASE,
        )
        .with_golden([
            "git submodule update --init contrib/zstd",
            r#"git config --global --add safe.directory "$PWD/contrib/zstd""#,
            "cd contrib/zstd",
            "git checkout HEAD~1",
            "cd ../..",
            "git add contrib/zstd",
            "git commit -m 'Rollback zstd submodule to previous commit'",
        ])
        .with_grader(GraderSpec::Git(git_grader(
            "fe6e961c8e2bac7ca5bad137f4e3e18eed9dc995",
            CATALOG_BASE,
            1,
            true,
        ))),
        ProblemSpec::new(
            "recover-from-bad-merge",
            "A colleague attempted to refactor `src/Common/thread_local_rng.cpp` to use lazy initialization but the refactor was incomplete and has compilation errors. The refactor branch was accidentally merged and then deleted. Please restore the branch to the state before the merge.",
            Difficulty::Hard,
            CATALOG_BASE,
        )
        .with_setup([
            "git checkout -b refactor-rng",
            BROKEN_RNG_SOURCE,
            "git add src/Common/thread_local_rng.cpp",
            "git commit -m 'Refactor: Add lazy initialization for thread local RNG (WIP)'",
            "git checkout -",
            "git merge --no-ff refactor-rng -m 'Merge refactor-rng'",
            "git branch -D refactor-rng",
        ])
        // HEAD@{3} is the branch creation, which still points at the base.
        .with_golden(["git reflog", "git reset --hard HEAD@{3}"])
        .with_grader(GraderSpec::Git(git_grader(TIP_TREE, REWRITE_POINT, 5, true))),
    ];
    problems.sort_by(|a, b| a.id.cmp(&b.id));
    problems
}
