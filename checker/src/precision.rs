// Copyright (c) Facebook, Inc. and its affiliates.
//
// This source code is licensed under the MIT license found in the
// LICENSE file in the root directory of this source tree.

use crate::cfa::Cfa;
use crate::location::Location;
use crate::options::TemplateLevel;
use crate::template::{self, Template};

use petgraph::graph::NodeIndex;
use std::cell::RefCell;
use std::collections::{BTreeSet, HashMap};

/// The templates tracked at each location. The precision only grows: templates are added by
/// refinement and by raising the generation level, never removed.
#[derive(Debug)]
pub struct TemplatePrecision {
    level: TemplateLevel,
    /// Templates added by refinement, per location.
    extra: HashMap<Location, BTreeSet<Template>>,
    generated: RefCell<HashMap<NodeIndex, BTreeSet<Template>>>,
}

impl TemplatePrecision {
    pub fn new(level: TemplateLevel) -> TemplatePrecision {
        TemplatePrecision {
            level,
            extra: HashMap::new(),
            generated: RefCell::new(HashMap::new()),
        }
    }

    pub fn level(&self) -> TemplateLevel {
        self.level
    }

    /// Raises the generation level. Returns false if the level is not higher than the current one.
    pub fn raise_level(&mut self, level: TemplateLevel) -> bool {
        if level <= self.level {
            return false;
        }
        self.level = level;
        self.generated.borrow_mut().clear();
        true
    }

    /// The templates to abstract at the location, fewest variables first.
    pub fn templates(&self, cfa: &Cfa, location: &Location) -> Vec<Template> {
        let mut result = self
            .generated
            .borrow_mut()
            .entry(location.node)
            .or_insert_with(|| template::generate_templates(cfa, location.node, self.level))
            .clone();
        if let Some(extra) = self.extra.get(location) {
            result.extend(extra.iter().cloned());
        }
        let mut result = result.into_iter().collect::<Vec<_>>();
        result.sort_by(|a, b| {
            a.variable_count()
                .cmp(&b.variable_count())
                .then_with(|| a.cmp(b))
        });
        result
    }

    /// Adds templates at the location. Returns true if a template was not yet tracked there.
    pub fn add_templates(
        &mut self,
        cfa: &Cfa,
        location: &Location,
        templates: impl IntoIterator<Item = Template>,
    ) -> bool {
        let known = self.templates(cfa, location).into_iter().collect::<BTreeSet<_>>();
        let extra = self.extra.entry(location.clone()).or_default();
        let mut changed = false;
        for template in templates {
            if !known.contains(&template) && extra.insert(template.clone()) {
                debug!("adding template {} at {}", template, location);
                changed = true;
            }
        }
        changed
    }

    /// The number of templates added by refinement.
    pub fn refinement_size(&self) -> usize {
        self.extra.values().map(|t| t.len()).sum()
    }
}
