use swc_core::ecma::ast::*;

/// How the value of an extraction call is bound
#[derive(Clone, Debug, PartialEq)]
pub enum DeclarationShape {
  /// `style({})` used as an expression, not directly initializing a declarator
  Bare,
  /// `const a = style({})`
  Single(Ident),
  /// `const [a, , b] = styleVariants({})`, with the index of each element.
  /// Holes are skipped.
  Destructured(Vec<(usize, Ident)>),
}

impl DeclarationShape {
  /// Every identifier bound by the declaration
  pub fn idents(&self) -> Vec<&Ident> {
    match self {
      DeclarationShape::Bare => vec![],
      DeclarationShape::Single(ident) => vec![ident],
      DeclarationShape::Destructured(elements) => elements.iter().map(|(_, ident)| ident).collect(),
    }
  }
}

/// Name of the unsupported pattern, used in error messages
pub type UnsupportedPattern = &'static str;

/// Classifies the binding pattern of a declarator initialized by an extraction call
pub fn classify_declarator(declarator: &VarDeclarator) -> Result<DeclarationShape, UnsupportedPattern> {
  match &declarator.name {
    Pat::Ident(binding) => Ok(DeclarationShape::Single(binding.id.clone())),
    Pat::Array(array) => {
      let mut elements = vec![];
      for (index, element) in array.elems.iter().enumerate() {
        match element {
          None => {}
          Some(Pat::Ident(binding)) => elements.push((index, binding.id.clone())),
          Some(other) => return Err(pattern_name(other)),
        }
      }
      Ok(DeclarationShape::Destructured(elements))
    }
    other => Err(pattern_name(other)),
  }
}

fn pattern_name(pat: &Pat) -> UnsupportedPattern {
  match pat {
    Pat::Ident(_) => "Identifier",
    Pat::Array(_) => "ArrayPattern",
    Pat::Rest(_) => "RestElement",
    Pat::Object(_) => "ObjectPattern",
    Pat::Assign(_) => "AssignmentPattern",
    Pat::Invalid(_) => "Invalid",
    Pat::Expr(_) => "Expression",
  }
}
