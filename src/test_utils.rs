//! Test utilities for property-based testing
//!
//! This module provides generators and helpers for proptest.

#[cfg(test)]
pub mod generators {
    use proptest::prelude::*;

    use crate::core::package::Package;
    use crate::core::version::PackageVersion;

    /// Generate a valid package base name (lowercase alphanumeric with hyphens)
    pub fn package_name() -> impl Strategy<Value = String> {
        "[a-z][a-z0-9-]{0,30}[a-z0-9]?".prop_filter("Name must not be empty", |s| !s.is_empty())
    }

    /// Generate a version string of the form `[epoch:]pkgver-pkgrel`
    pub fn package_version() -> impl Strategy<Value = String> {
        (
            0u32..3,
            "[0-9]{1,3}(\\.[0-9a-z]{1,3}){0,3}",
            1u32..10,
        )
            .prop_map(|(epoch, pkgver, pkgrel)| {
                if epoch > 0 {
                    format!("{epoch}:{pkgver}-{pkgrel}")
                } else {
                    format!("{pkgver}-{pkgrel}")
                }
            })
    }

    /// Generate an acyclic set of packages `p0..pN`
    ///
    /// Package `pi` may only depend on packages with a smaller index, so the
    /// generated graph never contains a cycle.
    pub fn acyclic_packages(max: usize) -> impl Strategy<Value = Vec<Package>> {
        (1..=max)
            .prop_flat_map(|count| {
                let edges: Vec<_> = (0..count)
                    .map(|i| proptest::collection::btree_set(0..i.max(1), 0..=i.min(3)))
                    .collect();
                (Just(count), edges)
            })
            .prop_map(|(count, edges)| {
                (0..count)
                    .map(|i| {
                        let depends = edges[i]
                            .iter()
                            .filter(|&&dep| dep < i)
                            .map(|dep| format!("p{dep}"));
                        Package::new(format!("p{i}"), PackageVersion::new(0, "1.0", "1"))
                            .with_depends(depends)
                    })
                    .collect()
            })
    }
}

#[cfg(test)]
mod tests {
    use super::generators::*;
    use crate::core::version::PackageVersion;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn test_package_name_generator(name in package_name()) {
            prop_assert!(!name.is_empty());
            prop_assert!(name.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-'));
        }

        #[test]
        fn test_package_version_generator(version in package_version()) {
            prop_assert!(PackageVersion::parse(&version).is_ok());
        }

        #[test]
        fn test_acyclic_packages_only_point_backwards(packages in acyclic_packages(12)) {
            for (index, package) in packages.iter().enumerate() {
                for dep in &package.depends {
                    let dep_index: usize = dep.trim_start_matches('p').parse().unwrap();
                    prop_assert!(dep_index < index);
                }
            }
        }
    }
}
