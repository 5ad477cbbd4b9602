#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};
    use warren_core::{Access, AgentDescriptor, SessionPermissions, WarrenError};
    use warren_sandbox::*;

    fn ws() -> SessionPermissions {
        SessionPermissions::workspace("/ws")
    }

    // ── Write sandbox ──────────────────────────────────────────

    mod write {
        use super::*;

        #[test]
        fn test_dotdot_escape_denied() {
            assert!(!access_allows(&ws(), &Access::write("/ws/../etc/passwd")));
        }

        #[test]
        fn test_inside_write_dir_allowed() {
            assert!(access_allows(&ws(), &Access::write("/ws/notes.txt")));
            assert!(access_allows(&ws(), &Access::write("/ws/deep/er/file.md")));
        }

        #[test]
        fn test_sibling_prefix_is_not_inside() {
            assert!(!access_allows(&ws(), &Access::write("/wsx/notes.txt")));
        }

        #[test]
        fn test_relative_target_denied() {
            assert!(!access_allows(&ws(), &Access::write("ws/notes.txt")));
            assert!(!access_allows(&ws(), &Access::read("notes.txt")));
        }

        #[test]
        fn test_dirty_targets_denied() {
            assert!(!access_allows(&ws(), &Access::write("/ws/a\0b")));
            assert!(!access_allows(&ws(), &Access::write("/ws/a\rb")));
            let long = format!("/ws/{}", "x".repeat(MAX_PATH_BYTES));
            assert!(!access_allows(&ws(), &Access::write(long)));
        }

        #[test]
        fn test_tab_and_newline_tolerated() {
            assert!(access_allows(&ws(), &Access::write("/ws/odd\tname")));
            assert!(access_allows(&ws(), &Access::write("/ws/odd\nname")));
        }

        #[test]
        fn test_no_write_dirs_denies_everything() {
            let perms = ws().with_write_dirs(vec![]);
            assert!(!access_allows(&perms, &Access::write("/ws/notes.txt")));
        }
    }

    // ── Policy-file guard ──────────────────────────────────────

    mod policy_files {
        use super::*;

        #[test]
        fn test_app_md_denied_under_write_dir() {
            assert!(!access_allows(&ws(), &Access::write("/ws/apps/foo/APP.md")));
            assert!(!access_allows(&ws(), &Access::write("/ws/apps/foo/PERMISSIONS.md")));
        }

        #[test]
        fn test_explicit_grant_allows() {
            let perms = ws().with_write_dirs(vec![
                PathBuf::from("/ws"),
                PathBuf::from("/ws/apps/foo/APP.md"),
            ]);
            assert!(access_allows(&perms, &Access::write("/ws/apps/foo/APP.md")));
            assert!(!access_allows(&perms, &Access::write("/ws/apps/foo/PERMISSIONS.md")));
        }

        #[test]
        fn test_only_direct_app_children_are_policy_files() {
            assert!(is_app_policy_file(Path::new("/ws/apps/foo/APP.md")));
            assert!(!is_app_policy_file(Path::new("/ws/apps/foo/docs/APP.md")));
            assert!(!is_app_policy_file(Path::new("/ws/foo/APP.md")));
            assert!(!is_app_policy_file(Path::new("/ws/apps/foo/README.md")));
            assert!(access_allows(&ws(), &Access::write("/ws/apps/foo/docs/APP.md")));
        }

        #[test]
        fn test_dotdot_into_policy_file_denied() {
            assert!(!access_allows(
                &ws(),
                &Access::write("/ws/apps/bar/../foo/APP.md")
            ));
        }

        #[test]
        fn test_reads_are_not_guarded() {
            assert!(access_allows(&ws(), &Access::read("/ws/apps/foo/APP.md")));
        }
    }

    // ── Read sandbox ───────────────────────────────────────────

    mod read {
        use super::*;

        #[test]
        fn test_empty_read_dirs_reads_anywhere() {
            assert!(access_allows(&ws(), &Access::read("/etc/hosts")));
            assert!(access_allows(&ws(), &Access::read("/ws/../etc/hosts")));
        }

        #[test]
        fn test_read_dirs_restrict_reads() {
            let perms = ws().with_read_dirs(vec![PathBuf::from("/data")]);
            assert!(access_allows(&perms, &Access::read("/data/file.csv")));
            assert!(access_allows(&perms, &Access::read("/ws/notes.txt")));
            assert!(!access_allows(&perms, &Access::read("/etc/hosts")));
            assert!(!access_allows(&perms, &Access::read("/data/../etc/hosts")));
        }

        #[test]
        fn test_write_dirs_are_readable() {
            let perms = SessionPermissions::workspace("/ws")
                .with_write_dirs(vec![PathBuf::from("/out")])
                .with_read_dirs(vec![PathBuf::from("/data")]);
            assert!(access_allows(&perms, &Access::read("/out/result.txt")));
            assert!(access_allows(&perms, &Access::read("/ws/notes.txt")));
        }
    }

    // ── Flags ──────────────────────────────────────────────────

    mod flags {
        use super::*;

        #[test]
        fn test_network_and_events() {
            assert!(!access_allows(&ws(), &Access::Network));
            assert!(!access_allows(&ws(), &Access::Events));
            let perms = ws().with_network(true).with_events(true);
            assert!(access_allows(&perms, &Access::Network));
            assert!(access_allows(&perms, &Access::Events));
        }

        #[test]
        fn test_workspace_requires_writable_working_dir() {
            assert!(access_allows(&ws(), &Access::Workspace));
            let perms = ws().with_write_dirs(vec![PathBuf::from("/elsewhere")]);
            assert!(!access_allows(&perms, &Access::Workspace));
        }
    }

    // ── Symlinks (real filesystem) ─────────────────────────────

    #[cfg(unix)]
    mod symlinks {
        use super::*;
        use std::os::unix::fs::symlink;

        #[test]
        fn test_symlink_escape_denied() {
            let root = tempfile::tempdir().unwrap();
            let allowed = root.path().join("allowed");
            let forbidden = root.path().join("forbidden");
            std::fs::create_dir_all(&allowed).unwrap();
            std::fs::create_dir_all(&forbidden).unwrap();
            std::fs::write(forbidden.join("secret.txt"), "s").unwrap();
            symlink(&forbidden, allowed.join("escape")).unwrap();

            let perms = SessionPermissions::workspace(&allowed);
            assert!(!access_allows(&perms, &Access::write(allowed.join("escape/secret.txt"))));
            assert!(!access_allows(&perms, &Access::write(allowed.join("escape/new.txt"))));
            assert!(access_allows(&perms, &Access::write(allowed.join("plain.txt"))));
        }

        #[test]
        fn test_symlinked_write_dir_resolves() {
            let root = tempfile::tempdir().unwrap();
            let real = root.path().join("real");
            std::fs::create_dir_all(&real).unwrap();
            let link = root.path().join("link");
            symlink(&real, &link).unwrap();

            let perms = SessionPermissions::workspace(&link);
            assert!(access_allows(&perms, &Access::write(real.join("a.txt"))));
            assert!(access_allows(&perms, &Access::write(link.join("a.txt"))));
        }

        #[test]
        fn test_dangling_symlink_denied() {
            let root = tempfile::tempdir().unwrap();
            let ws_dir = root.path().join("ws");
            std::fs::create_dir_all(&ws_dir).unwrap();
            symlink(root.path().join("nowhere/target"), ws_dir.join("dangling")).unwrap();

            let perms = SessionPermissions::workspace(&ws_dir);
            assert!(!access_allows(&perms, &Access::write(ws_dir.join("dangling"))));
        }

        #[test]
        fn test_symlink_onto_policy_file_denied() {
            let root = tempfile::tempdir().unwrap();
            let ws_dir = root.path().join("ws");
            let app = ws_dir.join("apps/foo");
            std::fs::create_dir_all(&app).unwrap();
            std::fs::write(app.join("APP.md"), "# foo").unwrap();
            symlink(app.join("APP.md"), ws_dir.join("innocent.md")).unwrap();

            let perms = SessionPermissions::workspace(&ws_dir);
            assert!(!access_allows(&perms, &Access::write(ws_dir.join("innocent.md"))));
        }
    }

    // ── Secure resolution ──────────────────────────────────────

    mod resolution {
        use super::*;

        #[test]
        fn test_error_messages() {
            let allowed = vec![PathBuf::from("/ws")];
            let err = path_resolve_secure(&allowed, Path::new("relative")).unwrap_err();
            assert!(err.to_string().contains("Path must be absolute."));
            let err = path_resolve_secure(&allowed, Path::new("/ws/a\0")).unwrap_err();
            assert!(err.to_string().contains("Path contains null byte."));
            let err = path_resolve_secure(&allowed, Path::new("/etc/passwd")).unwrap_err();
            assert!(matches!(err, WarrenError::PermissionDenied(_)));
            assert!(err.to_string().contains("Path is outside the allowed directories."));
        }

        #[test]
        fn test_reports_base() {
            let dir = tempfile::tempdir().unwrap();
            let base = dir.path().canonicalize().unwrap();
            let resolved = path_resolve_secure(
                &[PathBuf::from("/nonexistent-root"), dir.path().to_path_buf()],
                &dir.path().join("x/y.txt"),
            )
            .unwrap();
            assert_eq!(resolved.allowed_base, base);
            assert_eq!(resolved.real_path, base.join("x/y.txt"));
            assert!(is_within_secure(dir.path(), &dir.path().join("z")));
        }
    }

    // ── App isolation ──────────────────────────────────────────

    mod apps {
        use super::*;

        fn apps_dirs() -> Vec<PathBuf> {
            vec![PathBuf::from("/ws/apps")]
        }

        #[test]
        fn test_app_reaches_own_dir_only() {
            let dirs = apps_dirs();
            assert!(app_access_allows(Some("foo"), &dirs, Path::new("/ws/apps/foo/data.json")));
            assert!(!app_access_allows(Some("foo"), &dirs, Path::new("/ws/apps/bar/data.json")));
            assert!(!app_access_allows(
                Some("foo"),
                &dirs,
                Path::new("/ws/apps/foo/../bar/data.json")
            ));
            assert!(!app_access_allows(Some("foo"), &dirs, Path::new("/ws/apps")));
        }

        #[test]
        fn test_non_app_agents_are_kept_out() {
            let dirs = apps_dirs();
            assert!(!app_access_allows(None, &dirs, Path::new("/ws/apps/foo/APP.md")));
            assert!(app_access_allows(None, &dirs, Path::new("/ws/notes.txt")));
        }

        #[test]
        fn test_agent_sandbox_combines_rules() {
            let sandbox = AgentSandbox::new(SessionPermissions::workspace("/ws"))
                .with_app_id(Some("foo".into()))
                .with_apps_dir(PathBuf::from("/ws/apps"));
            assert!(sandbox.allows(&Access::write("/ws/apps/foo/state.json")));
            // Inside the write dir, but belongs to a sibling app.
            match sandbox.check(&Access::write("/ws/apps/bar/state.json")) {
                AccessVerdict::Deny(reason) => assert!(reason.contains("another app")),
                AccessVerdict::Allow => panic!("cross-app write allowed"),
            }
            // Own app, but still a policy file.
            assert!(!sandbox.allows(&Access::write("/ws/apps/foo/APP.md")));
        }

        #[test]
        fn test_engine_rule_order() {
            let engine = AccessEngine::new();
            assert_eq!(
                engine.rule_names(),
                vec!["capability", "path_shape", "policy_file", "sandbox_root", "app_isolation"]
            );
        }
    }

    // ── Permission builder ─────────────────────────────────────

    mod builder {
        use super::*;

        fn builder(dir: &Path) -> PermissionsBuilder {
            PermissionsBuilder::new(dir).with_defaults(false, true)
        }

        #[test]
        fn test_user_defaults() {
            let dir = tempfile::tempdir().unwrap();
            let perms = builder(dir.path()).for_user("u1").unwrap();
            let root = dir.path().canonicalize().unwrap();
            assert_eq!(perms.working_dir, root.join("u1/workspace"));
            assert_eq!(perms.write_dirs, vec![root.join("u1/workspace")]);
            assert!(perms.read_dirs.is_empty());
            assert!(!perms.network);
            assert!(perms.events);
        }

        #[test]
        fn test_bad_user_id_rejected() {
            let dir = tempfile::tempdir().unwrap();
            assert!(builder(dir.path()).for_user("../escape").is_err());
            assert!(builder(dir.path()).for_user("").is_err());
        }

        #[test]
        fn test_permanent_workspace_must_stay_inside() {
            let dir = tempfile::tempdir().unwrap();
            let b = builder(dir.path());
            let inside = AgentDescriptor::Permanent {
                id: "p".into(),
                name: "bob".into(),
                description: String::new(),
                system_prompt: String::new(),
                workspace_dir: Some(dir.path().join("u1/projects/bob")),
            };
            let perms = b.for_descriptor("u1", &inside, None).unwrap();
            assert!(perms.working_dir.ends_with("u1/projects/bob"));

            let outside = AgentDescriptor::Permanent {
                id: "p".into(),
                name: "bob".into(),
                description: String::new(),
                system_prompt: String::new(),
                workspace_dir: Some(dir.path().join("u2/projects")),
            };
            assert!(matches!(
                b.for_descriptor("u1", &outside, None),
                Err(WarrenError::PermissionDenied(_))
            ));
        }

        #[test]
        fn test_app_is_confined() {
            let dir = tempfile::tempdir().unwrap();
            let b = builder(dir.path());
            let app = AgentDescriptor::App {
                id: "a".into(),
                parent_agent_id: "p".into(),
                app_id: "weather".into(),
                system_prompt: String::new(),
            };
            let perms = b.for_descriptor("u1", &app, None).unwrap();
            let expected = b.apps_dir("u1").unwrap().join("weather");
            assert_eq!(perms.working_dir, expected);
            assert_eq!(perms.read_dirs, vec![expected.clone()]);
            assert!(!perms.events);
            assert!(!access_allows(&perms, &Access::read(dir.path().join("u1/workspace/secret.txt"))));
        }

        #[test]
        fn test_children_inherit_parent() {
            let dir = tempfile::tempdir().unwrap();
            let parent = SessionPermissions::workspace("/custom").with_network(true);
            let sub = AgentDescriptor::Subagent {
                id: "s".into(),
                parent_agent_id: "p".into(),
                name: "n".into(),
            };
            let perms = builder(dir.path()).for_descriptor("u1", &sub, Some(&parent)).unwrap();
            assert_eq!(perms, parent);
        }

        #[test]
        fn test_grant_returns_new_set() {
            let current = SessionPermissions::workspace("/ws");
            let next = PermissionsBuilder::grant(&current, &Access::Network).unwrap();
            assert!(next.network);
            assert!(!current.network);

            let next = PermissionsBuilder::grant(&next, &Access::read("/data/../data/x")).unwrap();
            assert_eq!(next.read_dirs, vec![PathBuf::from("/data/x")]);
            let again = PermissionsBuilder::grant(&next, &Access::read("/data/x")).unwrap();
            assert_eq!(again.read_dirs.len(), 1);

            assert!(PermissionsBuilder::grant(&current, &Access::write("relative")).is_err());
        }
    }
}
